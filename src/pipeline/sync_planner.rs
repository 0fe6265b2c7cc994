use std::cmp::Ordering;

use anyhow::Result;
use async_channel::Receiver;
use tracing::{debug, trace};

use super::diff_detector::{DiffDetector, build_diff_detector};
use super::stage::{SendResult, Stage};
use crate::config::SyncConfig;
use crate::location::Location;
use crate::types::{Action, ObjectInfo};

const SKIP_REASON_NOT_MODIFIED: &str = "not modified";
const SKIP_REASON_EXTRANEOUS: &str = "only in destination";

/// Ordered merge-join of two listings sorted by relative path. Emits
/// exactly one Action per relative path seen on either side.
pub struct SyncPlanner {
    base: Stage<ObjectInfo, Action>,
    target_receiver: Receiver<ObjectInfo>,
    target: Location,
    delete: bool,
    diff_detector: DiffDetector,
}

impl SyncPlanner {
    /// `base.receiver` carries the source listing, `target_receiver` the
    /// destination listing.
    pub fn new(
        base: Stage<ObjectInfo, Action>,
        target_receiver: Receiver<ObjectInfo>,
        target: Location,
        sync_config: SyncConfig,
    ) -> Self {
        Self {
            base,
            target_receiver,
            target,
            delete: sync_config.delete,
            diff_detector: build_diff_detector(sync_config.strategy),
        }
    }

    pub async fn plan(&self) -> Result<()> {
        trace!("sync planner has started.");

        let mut source_next = self.base.recv().await?;
        let mut target_next = self.recv_target().await;

        loop {
            if self.base.cancellation_token.is_cancelled() {
                debug!("sync planner has been cancelled.");
                break;
            }

            let action = match (source_next.take(), target_next.take()) {
                (None, None) => break,
                (Some(source), None) => {
                    source_next = self.base.recv().await?;
                    self.copy_action(source)
                }
                (None, Some(target)) => {
                    target_next = self.recv_target().await;
                    self.extraneous_action(target)
                }
                (Some(source), Some(target)) => {
                    match source.relative_path.cmp(&target.relative_path) {
                        Ordering::Less => {
                            target_next = Some(target);
                            source_next = self.base.recv().await?;
                            self.copy_action(source)
                        }
                        Ordering::Greater => {
                            source_next = Some(source);
                            target_next = self.recv_target().await;
                            self.extraneous_action(target)
                        }
                        Ordering::Equal => {
                            source_next = self.base.recv().await?;
                            target_next = self.recv_target().await;
                            self.compare_action(source, &target)
                        }
                    }
                }
            };

            if self.base.send(action).await? == SendResult::Closed {
                break;
            }
        }

        self.target_receiver.close();
        self.base.close_sender();
        trace!("sync planner has been completed.");

        Ok(())
    }

    async fn recv_target(&self) -> Option<ObjectInfo> {
        self.target_receiver.recv().await.ok()
    }

    fn copy_action(&self, source: ObjectInfo) -> Action {
        let target = self.target.join(&source.relative_path);
        Action::Copy { source, target }
    }

    fn extraneous_action(&self, target: ObjectInfo) -> Action {
        if self.delete {
            return Action::Delete { target };
        }

        Action::Skip {
            relative_path: target.relative_path,
            reason: SKIP_REASON_EXTRANEOUS.to_string(),
        }
    }

    fn compare_action(&self, source: ObjectInfo, target: &ObjectInfo) -> Action {
        if self.diff_detector.is_different(&source, target) {
            return self.copy_action(source);
        }

        Action::Skip {
            relative_path: source.relative_path,
            reason: SKIP_REASON_NOT_MODIFIED.to_string(),
        }
    }
}
