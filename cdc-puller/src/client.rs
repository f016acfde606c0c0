//! External collaborators the puller drives but does not implement itself:
//! a source of per-region event feeds, reached through a directory service
//! that hands out clients. Production wiring supplies real implementations;
//! tests supply fakes.

use async_trait::async_trait;
use span_frontier::Ts;
use span_util::Span;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::model::RegionFeedEvent;

/// A client capable of streaming change events for a single key span.
#[async_trait]
pub trait CdcClient: Send + Sync + 'static {
    /// Stream events for `span` starting at `start_ts` into `out` until
    /// `cancel` fires or the upstream feed ends on its own. Returns `Ok(())`
    /// on either a clean upstream close or cooperative cancellation; any
    /// other outcome is a genuine failure of this region's feed.
    async fn event_feed(
        &self,
        span: Span,
        start_ts: Ts,
        out: mpsc::Sender<RegionFeedEvent>,
        cancel: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Release any resources held by this client (connections, streams).
    async fn close(&self);
}

/// A directory of upstream endpoints capable of producing [`CdcClient`]s.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    type Client: CdcClient;

    async fn new_cdc_client(&self) -> Result<Self::Client, Box<dyn std::error::Error + Send + Sync>>;
}
