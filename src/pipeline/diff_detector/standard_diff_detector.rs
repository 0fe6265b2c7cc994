use aws_smithy_types_convert::date_time::DateTimeExt;
use tracing::debug;

use crate::pipeline::diff_detector::{DiffDetectionStrategy, DiffDetector};
use crate::types::ObjectInfo;

/// Copies when the sizes differ or the source is newer.
pub struct StandardDiffDetector;

const FILTER_NAME: &str = "StandardDiffDetector";

impl DiffDetectionStrategy for StandardDiffDetector {
    fn is_different(&self, source_object: &ObjectInfo, target_object: &ObjectInfo) -> bool {
        if source_object.size != target_object.size {
            return true;
        }

        // S3 timestamps have no sub-second part.
        if target_object.last_modified.secs() < source_object.last_modified.secs() {
            return true;
        }

        let source_last_modified = to_rfc3339(source_object);
        let target_last_modified = to_rfc3339(target_object);
        let key = source_object.key.as_str();

        debug!(
            name = FILTER_NAME,
            source_last_modified = source_last_modified,
            target_last_modified = target_last_modified,
            key = key,
            "object filtered."
        );

        false
    }
}

impl StandardDiffDetector {
    pub fn boxed_new() -> DiffDetector {
        Box::new(StandardDiffDetector {})
    }
}

fn to_rfc3339(object: &ObjectInfo) -> String {
    object
        .last_modified
        .to_chrono_utc()
        .map(|last_modified| last_modified.to_rfc3339())
        .unwrap_or_default()
}
