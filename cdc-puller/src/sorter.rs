//! Flush-cycle sorter: turns an arrival-ordered stream of mutations and
//! resolved-ts markers into a strictly ordered output where every mutation
//! between two consecutive `Resolved` markers has a `crts` no greater than
//! the marker that follows it.

use std::pin::Pin;
use std::task::{Context, Poll};

use span_frontier::Ts;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::PullerError;
use crate::model::RawKVEntry;

/// Handle for feeding entries into a running sorter task. Cheap to clone,
/// it's just the sending half of an unbounded channel.
#[derive(Clone)]
pub struct EntrySorter {
    input: mpsc::UnboundedSender<RawKVEntry>,
}

impl EntrySorter {
    /// Spawns the flusher task and returns a handle to feed it plus the
    /// receiving end of its sorted output.
    pub fn spawn(output_capacity: usize, cancel: CancellationToken) -> (Self, SorterOutput) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::channel(output_capacity.max(1));
        tokio::spawn(run(input_rx, output_tx, cancel));
        (
            Self { input: input_tx },
            SorterOutput {
                inner: ReceiverStream::new(output_rx),
            },
        )
    }

    /// Appends `entry`. Never blocks: the sorter's ingress is unbounded
    /// because its own output channel is where backpressure is applied.
    pub fn add_entry(&self, entry: RawKVEntry) -> Result<(), PullerError> {
        self.input
            .send(entry)
            .map_err(|_| PullerError::BufferClosed)
    }
}

/// The sorter's output stream: the final, totally-ordered sequence of
/// mutations interleaved with global resolved-ts markers.
pub struct SorterOutput {
    inner: ReceiverStream<RawKVEntry>,
}

impl SorterOutput {
    /// Convenience accessor for callers that prefer `.await` over driving
    /// this as a [`Stream`].
    pub async fn recv(&mut self) -> Option<RawKVEntry> {
        use tokio_stream::StreamExt;
        self.inner.next().await
    }
}

impl Stream for SorterOutput {
    type Item = RawKVEntry;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

async fn run(
    mut input: mpsc::UnboundedReceiver<RawKVEntry>,
    output: mpsc::Sender<RawKVEntry>,
    cancel: CancellationToken,
) -> Result<(), PullerError> {
    let mut pending: Vec<RawKVEntry> = Vec::new();
    let mut pending_resolved: Vec<Ts> = Vec::new();

    loop {
        let entry = tokio::select! {
            e = input.recv() => match e {
                Some(e) => e,
                None => return Ok(()),
            },
            _ = cancel.cancelled() => return Err(PullerError::Cancelled),
        };

        if !entry.is_resolved() {
            pending.push(entry);
            continue;
        }

        pending_resolved.push(entry.crts());
        let flushed = flush(&mut pending, &mut pending_resolved);

        for item in flushed {
            tokio::select! {
                res = output.send(item) => {
                    if res.is_err() {
                        return Ok(());
                    }
                }
                _ = cancel.cancelled() => return Err(PullerError::Cancelled),
            }
        }
    }
}

/// One flush cycle: stable-sort `pending` by `crts`, then for each pending
/// resolved-ts `R` in ascending order emit every not-yet-emitted entry with
/// `crts <= R` followed by a `Resolved { crts: R }` marker. Entries with
/// `crts` greater than the largest `R` are left in `pending` for the next
/// cycle.
fn flush(pending: &mut Vec<RawKVEntry>, pending_resolved: &mut Vec<Ts>) -> Vec<RawKVEntry> {
    pending.sort_by_key(RawKVEntry::crts);
    pending_resolved.sort_unstable();
    pending_resolved.dedup();

    let mut out = Vec::with_capacity(pending.len() + pending_resolved.len());
    for &r in pending_resolved.iter() {
        let mut split_at = 0;
        while split_at < pending.len() && pending[split_at].crts() <= r {
            split_at += 1;
        }
        out.extend(pending.drain(..split_at));
        out.push(RawKVEntry::Resolved { crts: r });
    }

    pending_resolved.clear();
    out
}
