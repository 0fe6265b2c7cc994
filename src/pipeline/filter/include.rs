use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::config::FilterConfig;
use crate::pipeline::filter::{ObjectFilter, ObjectFilterBase};
use crate::pipeline::stage::Stage;
use crate::types::ObjectInfo;

/// Passes objects whose relative path matches at least one include pattern.
pub struct IncludeFilter<'a> {
    base: ObjectFilterBase<'a>,
}

const FILTER_NAME: &str = "IncludeFilter";

impl IncludeFilter<'_> {
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
impl ObjectFilter for IncludeFilter<'_> {
    async fn filter(&self) -> Result<()> {
        self.base.filter(is_match).await
    }
}

fn is_match(object: &ObjectInfo, config: &FilterConfig) -> bool {
    if config.include.is_empty() {
        return true;
    }

    let match_result = config
        .include
        .iter()
        .any(|pattern| pattern.is_match(&object.relative_path));

    if !match_result {
        let key = object.key.as_str();
        let relative_path = object.relative_path.as_str();

        debug!(
            name = FILTER_NAME,
            key = key,
            relative_path = relative_path,
            "object filtered."
        );
    }

    match_result
}
