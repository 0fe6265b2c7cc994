use tracing::debug;

use crate::pipeline::diff_detector::{DiffDetectionStrategy, DiffDetector};
use crate::types::ObjectInfo;

pub struct SizeDiffDetector;

const FILTER_NAME: &str = "SizeDiffDetector";

impl DiffDetectionStrategy for SizeDiffDetector {
    fn is_different(&self, source_object: &ObjectInfo, target_object: &ObjectInfo) -> bool {
        let different_size = source_object.size != target_object.size;
        if !different_size {
            let content_length = source_object.size;
            let key = source_object.key.as_str();

            debug!(
                name = FILTER_NAME,
                content_length = content_length,
                key = key,
                "object filtered."
            );
        }

        different_size
    }
}

impl SizeDiffDetector {
    pub fn boxed_new() -> DiffDetector {
        Box::new(SizeDiffDetector {})
    }
}
