use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::config::FilterConfig;
use crate::pipeline::filter::{ObjectFilter, ObjectFilterBase};
use crate::pipeline::stage::Stage;
use crate::types::ObjectInfo;

/// Drops objects whose relative path matches any exclude pattern.
pub struct ExcludeFilter<'a> {
    base: ObjectFilterBase<'a>,
}

const FILTER_NAME: &str = "ExcludeFilter";

impl ExcludeFilter<'_> {
    pub fn new(base: Stage<ObjectInfo, ObjectInfo>) -> Self {
        Self {
            base: ObjectFilterBase {
                base,
                name: FILTER_NAME,
            },
        }
    }
}

#[async_trait]
impl ObjectFilter for ExcludeFilter<'_> {
    async fn filter(&self) -> Result<()> {
        self.base.filter(is_not_match).await
    }
}

fn is_not_match(object: &ObjectInfo, config: &FilterConfig) -> bool {
    let matched_pattern = config
        .exclude
        .iter()
        .find(|pattern| pattern.is_match(&object.relative_path));

    if let Some(pattern) = matched_pattern {
        let key = object.key.as_str();
        let exclude = pattern.as_str();

        debug!(
            name = FILTER_NAME,
            key = key,
            exclude = exclude,
            "object filtered."
        );
        return false;
    }

    true
}
