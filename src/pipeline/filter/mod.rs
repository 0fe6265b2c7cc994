use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::stage::{SendResult, Stage};
use crate::config::FilterConfig;
pub use crate::pipeline::filter::exclude::ExcludeFilter;
pub use crate::pipeline::filter::include::IncludeFilter;
use crate::types::ObjectInfo;

mod exclude;
mod include;

#[async_trait]
pub trait ObjectFilter {
    async fn filter(&self) -> Result<()>;
}

pub struct ObjectFilterBase<'a> {
    name: &'a str,
    base: Stage<ObjectInfo, ObjectInfo>,
}

impl ObjectFilterBase<'_> {
    pub async fn filter<F>(&self, filter_fn: F) -> Result<()>
    where
        F: Fn(&ObjectInfo, &FilterConfig) -> bool,
    {
        self.receive_and_filter(filter_fn).await
    }

    async fn receive_and_filter<F>(&self, filter_fn: F) -> Result<()>
    where
        F: Fn(&ObjectInfo, &FilterConfig) -> bool,
    {
        loop {
            tokio::task::yield_now().await;
            if self.base.cancellation_token.is_cancelled() {
                debug!(name = self.name, "filter has been cancelled.");
                return Ok(());
            }

            match self.base.recv().await? {
                Some(object) => {
                    if !filter_fn(&object, &self.base.config.filter_config) {
                        continue;
                    }

                    if self.base.send(object).await? == SendResult::Closed {
                        return Ok(());
                    }
                }
                None => {
                    debug!(name = self.name, "filter has been completed.");
                    return Ok(());
                }
            }
        }
    }
}
