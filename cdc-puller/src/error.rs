use span_util::Span;
use thiserror::Error;

/// Errors a puller can surface from [`crate::Puller::run`].
///
/// `Cancelled` is never returned to a caller that didn't itself cancel the
/// token it handed to the puller: internally it's used to unwind a select
/// loop without treating shutdown as a failure.
#[derive(Debug, Error)]
pub enum PullerError {
    #[error("cdc client failed to start: {0}")]
    Startup(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("region feed for span {span} failed: {source}")]
    RegionFeed {
        span: Span,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("a puller task panicked: {0}")]
    TaskPanicked(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("internal buffer closed unexpectedly")]
    BufferClosed,

    #[error("operation cancelled")]
    Cancelled,
}
