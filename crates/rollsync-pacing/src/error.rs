//! Error types for the pacing layer.

/// Errors returned by [`ConnectionRecycler`](crate::ConnectionRecycler).
#[derive(Debug, thiserror::Error)]
pub enum PacingError {
    /// The factory could not build a pipeline. When this happens during a
    /// refresh, the previous pipeline stays in service.
    #[error("failed to build outbound pipeline: {0}")]
    PipelineBuild(#[source] Box<dyn std::error::Error + Send + Sync>),
}
