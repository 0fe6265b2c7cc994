use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow};
use async_channel::{Receiver, Sender};

use crate::Config;
use crate::storage::StorageSet;
use crate::types::token::PipelineCancellationToken;

/// Shared state of a pipeline stage. `I` is what the stage receives and `O`
/// is what it sends to the next one.
pub struct Stage<I, O> {
    pub config: Config,
    pub storages: StorageSet,
    pub receiver: Option<Receiver<I>>,
    pub sender: Option<Sender<O>>,
    pub cancellation_token: PipelineCancellationToken,
    pub has_warning: Arc<AtomicBool>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendResult {
    Success,
    Closed,
}

impl<I, O> Stage<I, O> {
    pub fn new(
        config: Config,
        storages: StorageSet,
        receiver: Option<Receiver<I>>,
        sender: Option<Sender<O>>,
        cancellation_token: PipelineCancellationToken,
        has_warning: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            storages,
            receiver,
            sender,
            cancellation_token,
            has_warning,
        }
    }

    pub async fn send(&self, item: O) -> Result<SendResult> {
        let sender = self.sender()?;
        if sender.send(item).await.is_err() {
            return if !sender.is_closed() {
                Err(anyhow!("async_channel::Sender::send() failed."))
            } else {
                Ok(SendResult::Closed)
            };
        }

        Ok(SendResult::Success)
    }

    /// Receives the next item. `None` once the previous stage has finished.
    pub async fn recv(&self) -> Result<Option<I>> {
        let receiver = self
            .receiver
            .as_ref()
            .ok_or_else(|| anyhow!("stage has no receiver."))?;

        Ok(receiver.recv().await.ok())
    }

    pub fn is_channel_closed(&self) -> bool {
        self.sender.as_ref().is_none_or(|sender| sender.is_closed())
    }

    pub fn close_sender(&self) {
        if let Some(sender) = self.sender.as_ref() {
            sender.close();
        }
    }

    pub fn set_warning(&self) {
        self.has_warning.store(true, Ordering::SeqCst);
    }

    fn sender(&self) -> Result<&Sender<O>> {
        self.sender
            .as_ref()
            .ok_or_else(|| anyhow!("stage has no sender."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::args::build_config_from_args;
    use crate::types::token::create_pipeline_cancellation_token;
    use tracing_subscriber::EnvFilter;

    fn create_stage(
        receiver: Option<Receiver<u32>>,
        sender: Option<Sender<u32>>,
    ) -> Stage<u32, u32> {
        let config =
            build_config_from_args(vec!["s3bulk", "cp", "./src", "s3://target-bucket/"]).unwrap();

        Stage::new(
            config,
            StorageSet::new(),
            receiver,
            sender,
            create_pipeline_cancellation_token(),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[tokio::test]
    async fn send_success() {
        init_dummy_tracing_subscriber();

        let (sender, receiver) = async_channel::bounded::<u32>(10);
        let stage = create_stage(None, Some(sender));

        assert_eq!(stage.send(1).await.unwrap(), SendResult::Success);
        assert_eq!(receiver.recv().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn send_to_closed_channel() {
        init_dummy_tracing_subscriber();

        let (sender, receiver) = async_channel::bounded::<u32>(10);
        let stage = create_stage(None, Some(sender));
        receiver.close();

        assert_eq!(stage.send(1).await.unwrap(), SendResult::Closed);
        assert!(stage.is_channel_closed());
    }

    #[tokio::test]
    async fn send_without_sender() {
        init_dummy_tracing_subscriber();

        let stage = create_stage(None, None);

        assert!(stage.send(1).await.is_err());
    }

    #[tokio::test]
    async fn recv_until_closed() {
        init_dummy_tracing_subscriber();

        let (sender, receiver) = async_channel::bounded::<u32>(10);
        let stage = create_stage(Some(receiver), None);
        sender.send(7).await.unwrap();
        sender.close();

        assert_eq!(stage.recv().await.unwrap(), Some(7));
        assert_eq!(stage.recv().await.unwrap(), None);
    }

    #[test]
    fn set_warning() {
        init_dummy_tracing_subscriber();

        let stage = create_stage(None, None);
        stage.set_warning();

        assert!(stage.has_warning.load(Ordering::SeqCst));
    }

    fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .or_else(|_| EnvFilter::try_new("dummy=trace"))
                    .unwrap(),
            )
            .try_init();
    }
}
