use crate::pipeline::diff_detector::{DiffDetectionStrategy, DiffDetector};
use crate::types::ObjectInfo;

pub struct AlwaysDifferentDiffDetector;

impl DiffDetectionStrategy for AlwaysDifferentDiffDetector {
    fn is_different(&self, _source_object: &ObjectInfo, _target_object: &ObjectInfo) -> bool {
        true
    }
}

impl AlwaysDifferentDiffDetector {
    pub fn boxed_new() -> DiffDetector {
        Box::new(AlwaysDifferentDiffDetector {})
    }
}
