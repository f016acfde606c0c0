//! The puller driver wires together ingress, the memory buffer, the channel
//! buffer, the frontier, and the sorter into a single supervised pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use span_frontier::{SpanFrontier, Ts};
use span_util::{IdentityKeyEncoder, KeyEncoder, Span};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::chan_buffer::ChanBuffer;
use crate::client::CdcClient;
use crate::config::PullerConfig;
use crate::error::PullerError;
use crate::mem_buffer::MemBuffer;
use crate::metrics::PullerMetrics;
use crate::model::{RawKVEntry, RegionFeedEvent};
use crate::sorter::{EntrySorter, SorterOutput};

enum OutputMode {
    Raw,
    Sorted(EntrySorter),
}

/// Drives a set of region feeds for the spans a single puller subscribes to,
/// merging them into one output stream with a monotonically advancing
/// global resolved timestamp.
///
/// Call [`Puller::output`] or [`Puller::sorted_output`] to obtain the output
/// handle before calling [`Puller::run`]; exactly one of the two may be
/// called per instance, and both must happen before `run` so the consumer
/// task it spawns can be wired in up front.
pub struct Puller<C> {
    client: Arc<C>,
    spans: Vec<Span>,
    checkpoint_ts: Ts,
    key_encoder: Arc<dyn KeyEncoder>,
    config: PullerConfig,
    metrics: PullerMetrics,

    event_tx: mpsc::Sender<RegionFeedEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<RegionFeedEvent>>>,

    mem_buffer: Arc<MemBuffer>,
    chan_buffer: Arc<ChanBuffer<RegionFeedEvent>>,

    frontier: Arc<SpanFrontier>,
    resolved_ts: Arc<AtomicU64>,

    cancel: CancellationToken,
    output_mode: Mutex<Option<OutputMode>>,
}

impl<C: CdcClient> Puller<C> {
    pub fn new(client: C, spans: Vec<Span>, checkpoint_ts: Ts, config: PullerConfig) -> Self {
        Self::with_key_encoder(
            client,
            spans,
            checkpoint_ts,
            config,
            Arc::new(IdentityKeyEncoder),
        )
    }

    pub fn with_key_encoder(
        client: C,
        spans: Vec<Span>,
        checkpoint_ts: Ts,
        config: PullerConfig,
        key_encoder: Arc<dyn KeyEncoder>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let frontier = Arc::new(SpanFrontier::new(spans.clone(), checkpoint_ts));

        Self {
            client: Arc::new(client),
            spans,
            checkpoint_ts,
            key_encoder,
            mem_buffer: Arc::new(MemBuffer::new(
                config.mem_quota_hi_bytes,
                config.mem_quota_lo_bytes,
            )),
            chan_buffer: Arc::new(ChanBuffer::new(config.chan_buffer_capacity)),
            config,
            metrics: PullerMetrics,
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            frontier,
            resolved_ts: Arc::new(AtomicU64::new(checkpoint_ts)),
            cancel: CancellationToken::new(),
            output_mode: Mutex::new(None),
        }
    }

    /// A token that, when cancelled, stops this puller's run loop and every
    /// task it owns.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Lock-free read of the last published global resolved timestamp. Stays
    /// at `checkpoint_ts` until [`Puller::sorted_output`] has been requested
    /// and `run` has processed at least one resolved-ts marker that advances
    /// it; the raw [`Puller::output`] path never touches the frontier.
    pub fn get_resolved_ts(&self) -> Ts {
        self.resolved_ts.load(Ordering::Acquire)
    }

    /// Takes the raw, region-interleaved output stream, bypassing the
    /// sorter. For consumers that implement their own ordering downstream.
    pub fn output(&self) -> Arc<ChanBuffer<RegionFeedEvent>> {
        let mut mode = self.output_mode.lock();
        assert!(
            mode.is_none(),
            "output() or sorted_output() already called for this puller"
        );
        *mode = Some(OutputMode::Raw);
        Arc::clone(&self.chan_buffer)
    }

    /// Takes the sorted, watermark-interleaved output stream described by
    /// the entry sorter.
    pub fn sorted_output(&self) -> SorterOutput {
        let mut mode = self.output_mode.lock();
        assert!(
            mode.is_none(),
            "output() or sorted_output() already called for this puller"
        );
        let (sorter, output) = EntrySorter::spawn(self.config.chan_buffer_capacity, self.cancel.clone());
        *mode = Some(OutputMode::Sorted(sorter));
        output
    }

    /// Runs every region feed, the ingress filter, the drain task, the
    /// observability tick, and (if [`Puller::sorted_output`] was called) the
    /// resolved-ts publication task, under one failure group: the first
    /// non-cancellation error cancels every sibling and is returned.
    pub async fn run(&self) -> Result<(), PullerError> {
        let event_rx = self
            .event_rx
            .lock()
            .take()
            .expect("Puller::run called more than once");

        let mut tasks: JoinSet<Result<(), PullerError>> = JoinSet::new();

        for span in &self.spans {
            let client = Arc::clone(&self.client);
            let tx = self.event_tx.clone();
            let cancel = self.cancel.clone();
            let span = span.clone();
            let checkpoint_ts = self.checkpoint_ts;
            tasks.spawn(async move {
                let span_for_err = span.clone();
                match client
                    .event_feed(span, checkpoint_ts, tx, cancel.clone())
                    .await
                {
                    Ok(()) => Ok(()),
                    Err(_) if cancel.is_cancelled() => Err(PullerError::Cancelled),
                    Err(source) => Err(PullerError::RegionFeed {
                        span: span_for_err,
                        source,
                    }),
                }
            });
        }

        tasks.spawn(observability_tick(
            Arc::clone(&self.mem_buffer),
            Arc::clone(&self.chan_buffer),
            self.metrics,
            self.config.observability_tick(),
            self.cancel.clone(),
        ));

        tasks.spawn(ingress_filter(
            event_rx,
            self.spans.clone(),
            Arc::clone(&self.key_encoder),
            Arc::clone(&self.mem_buffer),
            self.metrics,
            self.cancel.clone(),
        ));

        tasks.spawn(drain(
            Arc::clone(&self.mem_buffer),
            Arc::clone(&self.chan_buffer),
            self.cancel.clone(),
        ));

        {
            let mode = self.output_mode.lock();
            if let Some(OutputMode::Sorted(sorter)) = mode.as_ref() {
                tasks.spawn(publish_resolved_ts(
                    Arc::clone(&self.chan_buffer),
                    Arc::clone(&self.frontier),
                    Arc::clone(&self.resolved_ts),
                    sorter.clone(),
                    self.metrics,
                    self.cancel.clone(),
                ));
            }
        }

        let mut first_error: Option<PullerError> = None;
        while let Some(res) = tasks.join_next().await {
            let outcome = match res {
                Ok(inner) => inner,
                Err(join_err) => Err(PullerError::TaskPanicked(Box::new(join_err))),
            };
            match outcome {
                Ok(()) => {}
                Err(PullerError::Cancelled) => {}
                Err(e) => {
                    if first_error.is_none() {
                        warn!(error = %e, "puller task failed, cancelling siblings");
                        self.cancel.cancel();
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn observability_tick(
    mem_buffer: Arc<MemBuffer>,
    chan_buffer: Arc<ChanBuffer<RegionFeedEvent>>,
    metrics: PullerMetrics,
    period: std::time::Duration,
    cancel: CancellationToken,
) -> Result<(), PullerError> {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                metrics.set_mem_buffer_bytes(mem_buffer.size());
                metrics.set_chan_buffer_len(chan_buffer.len());
            }
            _ = cancel.cancelled() => return Err(PullerError::Cancelled),
        }
    }
}

async fn ingress_filter(
    mut event_rx: mpsc::Receiver<RegionFeedEvent>,
    spans: Vec<Span>,
    key_encoder: Arc<dyn KeyEncoder>,
    mem_buffer: Arc<MemBuffer>,
    metrics: PullerMetrics,
    cancel: CancellationToken,
) -> Result<(), PullerError> {
    loop {
        let event = tokio::select! {
            e = event_rx.recv() => match e {
                Some(e) => e,
                None => return Ok(()),
            },
            _ = cancel.cancelled() => return Err(PullerError::Cancelled),
        };

        match &event {
            RegionFeedEvent::Val(mutation) => {
                let key: Bytes = key_encoder.encode(mutation.key());
                if !spans.iter().any(|s| s.contains_key(&key)) {
                    trace!(region_id = mutation.region_id(), "dropping out-of-span key");
                    continue;
                }
                metrics.inc_ingress("val");
            }
            RegionFeedEvent::Resolved { .. } => metrics.inc_ingress("resolved"),
        }

        mem_buffer.add_entry(event, &cancel).await?;
    }
}

async fn drain(
    mem_buffer: Arc<MemBuffer>,
    chan_buffer: Arc<ChanBuffer<RegionFeedEvent>>,
    cancel: CancellationToken,
) -> Result<(), PullerError> {
    loop {
        let event = mem_buffer.get(&cancel).await?;
        chan_buffer.add_entry(event, &cancel).await?;
    }
}

async fn publish_resolved_ts(
    chan_buffer: Arc<ChanBuffer<RegionFeedEvent>>,
    frontier: Arc<SpanFrontier>,
    resolved_ts: Arc<AtomicU64>,
    sorter: EntrySorter,
    metrics: PullerMetrics,
    cancel: CancellationToken,
) -> Result<(), PullerError> {
    loop {
        let event = chan_buffer.get(&cancel).await?;
        match event {
            RegionFeedEvent::Val(mutation) => {
                metrics.inc_emitted("val");
                sorter.add_entry(RawKVEntry::from(mutation))?;
            }
            RegionFeedEvent::Resolved { span, ts } => {
                // `forward` reports the new global minimum, which is not
                // necessarily `ts`: another sub-span untouched by this call
                // may already sit below `ts` and still hold the true
                // minimum down. The single-writer discipline only rules out
                // a *concurrent* forward changing the answer between here
                // and the call above -- it does not make the new minimum
                // equal to the ts just forwarded, so the reported value is
                // used as-is rather than re-derived from `ts`.
                if let Some(new_min) = frontier.forward(&span, ts) {
                    resolved_ts.store(new_min, Ordering::Release);
                    metrics.set_resolved_ts_physical(new_min);
                    metrics.inc_emitted("resolved");
                    sorter.add_entry(RawKVEntry::Resolved { crts: new_min })?;
                }
            }
        }
    }
}
