pub type PipelineCancellationToken = tokio_util::sync::CancellationToken;

pub fn create_pipeline_cancellation_token() -> PipelineCancellationToken {
    tokio_util::sync::CancellationToken::new()
}

/// A token scoped to one multipart transfer. Cancelling the pipeline cancels it,
/// cancelling it leaves the pipeline untouched.
pub fn create_transfer_cancellation_token(
    parent: &PipelineCancellationToken,
) -> PipelineCancellationToken {
    parent.child_token()
}
