pub mod always_different_diff_detector;
pub mod etag_diff_detector;
pub mod size_diff_detector;
pub mod standard_diff_detector;

use crate::config::CompareStrategy;
use crate::types::ObjectInfo;

use always_different_diff_detector::AlwaysDifferentDiffDetector;
use etag_diff_detector::ETagDiffDetector;
use size_diff_detector::SizeDiffDetector;
use standard_diff_detector::StandardDiffDetector;

pub type DiffDetector = Box<dyn DiffDetectionStrategy + Send + Sync>;

/// Decides whether an object present on both sides has to be copied again.
pub trait DiffDetectionStrategy {
    fn is_different(&self, source_object: &ObjectInfo, target_object: &ObjectInfo) -> bool;
}

pub fn build_diff_detector(strategy: CompareStrategy) -> DiffDetector {
    match strategy {
        CompareStrategy::SizeOnly => SizeDiffDetector::boxed_new(),
        CompareStrategy::SizeAndModification => StandardDiffDetector::boxed_new(),
        CompareStrategy::Hash => ETagDiffDetector::boxed_new(),
        CompareStrategy::AlwaysOverwrite => AlwaysDifferentDiffDetector::boxed_new(),
    }
}

#[cfg(test)]
mod tests {
    use aws_sdk_s3::primitives::DateTime;

    use super::*;

    #[test]
    fn build_each_strategy() {
        let source = ObjectInfo::new("a", 6, DateTime::from_secs(1));
        let target = ObjectInfo::new("a", 6, DateTime::from_secs(1));

        assert!(!build_diff_detector(CompareStrategy::SizeOnly).is_different(&source, &target));
        assert!(
            !build_diff_detector(CompareStrategy::SizeAndModification)
                .is_different(&source, &target)
        );
        assert!(build_diff_detector(CompareStrategy::AlwaysOverwrite).is_different(&source, &target));
    }
}
