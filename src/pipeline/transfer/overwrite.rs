use crate::config::OverwritePolicy;
use crate::types::ObjectInfo;

#[derive(Debug, Clone, PartialEq)]
pub enum OverwriteDecision {
    Allow,
    Reject(String),
}

/// Decides whether `source` may replace `target`. A missing destination
/// always passes. Flags are applied in the order no-clobber, size-differ,
/// source-newer and a later flag overrides the decision of an earlier one.
pub fn evaluate(
    policy: &OverwritePolicy,
    source: &ObjectInfo,
    target: Option<&ObjectInfo>,
) -> OverwriteDecision {
    let Some(target) = target else {
        return OverwriteDecision::Allow;
    };

    let mut decision = OverwriteDecision::Allow;

    if policy.no_clobber {
        decision = OverwriteDecision::Reject("destination exists (no-clobber)".to_string());
    }

    if policy.if_size_differ {
        decision = if source.size != target.size {
            OverwriteDecision::Allow
        } else {
            OverwriteDecision::Reject("destination has the same size".to_string())
        };
    }

    if policy.if_source_newer {
        decision = if target.last_modified.secs() < source.last_modified.secs() {
            OverwriteDecision::Allow
        } else {
            OverwriteDecision::Reject("destination is not older than source".to_string())
        };
    }

    decision
}
