use tokio::task::JoinHandle;
use tokio::{select, signal};
use tracing::{debug, error, warn};

use s3bulk::types::token::PipelineCancellationToken;

const EXIT_CODE_INTERRUPTED: i32 = 130;

/// The first ctrl-c stops new jobs and lets in-flight ones finish. A second
/// one exits at once.
pub fn spawn_ctrl_c_handler(cancellation_token: PipelineCancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        select! {
            _ = cancellation_token.cancelled() => {
                debug!("cancellation_token canceled.");
                return;
            }
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("failed to listen for ctrl-c signal: {e}");
                    return;
                }

                warn!("ctrl-c received, waiting for in-flight jobs. press ctrl-c again to exit now.");
                cancellation_token.cancel();
            }
        }

        tokio::spawn(async {
            if signal::ctrl_c().await.is_ok() {
                error!("ctrl-c received again, exiting.");
                std::process::exit(EXIT_CODE_INTERRUPTED);
            }
        });
    })
}
