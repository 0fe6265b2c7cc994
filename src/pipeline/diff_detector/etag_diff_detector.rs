use tracing::debug;

use crate::pipeline::diff_detector::{DiffDetectionStrategy, DiffDetector};
use crate::types::{ObjectInfo, is_multipart_upload_e_tag};

const FILTER_NAME: &str = "ETagDiffDetector";

/// Compares content fingerprints. A local side carries the MD5 of the file,
/// a remote side its ETag. Equal ETags mean equal content, also for two
/// multipart ETags. A multipart ETag is not an MD5 of the content, so it
/// never equals a local MD5 and such objects are always copied.
pub struct ETagDiffDetector;

impl DiffDetectionStrategy for ETagDiffDetector {
    fn is_different(&self, source_object: &ObjectInfo, target_object: &ObjectInfo) -> bool {
        if source_object.size != target_object.size {
            return true;
        }

        let source_e_tag = source_object.normalized_e_tag();
        let target_e_tag = target_object.normalized_e_tag();
        let (Some(source_e_tag), Some(target_e_tag)) = (source_e_tag, target_e_tag) else {
            return true;
        };

        if source_e_tag != target_e_tag {
            if is_multipart_upload_e_tag(&source_object.e_tag)
                != is_multipart_upload_e_tag(&target_object.e_tag)
            {
                let key = source_object.key.as_str();
                debug!(
                    name = FILTER_NAME,
                    key = key,
                    "multipart ETag cannot be compared with an MD5, object is copied."
                );
            }
            return true;
        }

        let key = source_object.key.as_str();
        debug!(
            name = FILTER_NAME,
            source_e_tag = source_e_tag,
            target_e_tag = target_e_tag,
            key = key,
            "object filtered."
        );

        false
    }
}

impl ETagDiffDetector {
    pub fn boxed_new() -> DiffDetector {
        Box::new(ETagDiffDetector {})
    }
}
