//! The span frontier tracks, for a partition of subscribed [`Span`]s, the
//! resolved timestamp of each sub-span and reports the minimum across all of
//! them: the single global timestamp at or below which every byte of every
//! subscribed span has been resolved.
//!
//! The mapping is kept as a [`crossbeam_skiplist::SkipMap`] ordered by each
//! sub-span's start byte, per the "balanced tree keyed by span.start"
//! representation described for this component; the skiplist already gives
//! sorted iteration, so the cached minimum is simply recomputed by scanning
//! the partition whenever a `forward` call could have lowered or raised it,
//! rather than maintaining a separate min-heap.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;
use span_util::Span;
use tracing::trace;

/// A 64-bit hybrid logical timestamp. The frontier only ever compares and
/// forwards timestamps; it never mints one.
pub type Ts = u64;

struct SubSpan {
    end: Bytes,
    ts: AtomicU64,
}

/// Tracks the resolved timestamp of a partition of subscribed spans.
///
/// **Concurrency contract:** single-writer. Callers must serialize calls to
/// [`SpanFrontier::forward`]; `frontier()` may be read concurrently by a
/// single external reader (in this codebase that reader is the puller
/// driver's published `resolved_ts` atomic, which copies the value out
/// rather than letting external code observe the frontier directly).
pub struct SpanFrontier {
    spans: SkipMap<Bytes, SubSpan>,
    min: AtomicU64,
}

impl SpanFrontier {
    /// Build a frontier covering the union of `spans`, all initialized to
    /// `init_ts`. Overlapping or adjacent input spans are merged into a
    /// single partition entry, mirroring a merging interval tree: the
    /// frontier only ever needs to report the resolved ts of the union, not
    /// of each original input span.
    pub fn new(spans: impl IntoIterator<Item = Span>, init_ts: Ts) -> Self {
        let mut sorted: Vec<Span> = spans.into_iter().filter(|s| !s.is_empty()).collect();
        sorted.sort();

        let mut merged: Vec<Span> = Vec::with_capacity(sorted.len());
        for span in sorted {
            match merged.last_mut() {
                Some(prev) if span.start <= prev.end => {
                    if span.end > prev.end {
                        prev.end = span.end;
                    }
                }
                _ => merged.push(span),
            }
        }

        let map = SkipMap::new();
        for span in merged {
            map.insert(
                span.start,
                SubSpan {
                    end: span.end,
                    ts: AtomicU64::new(init_ts),
                },
            );
        }

        Self {
            spans: map,
            min: AtomicU64::new(init_ts),
        }
    }

    /// The current minimum resolved timestamp across the whole partition.
    pub fn frontier(&self) -> Ts {
        self.min.load(Ordering::Acquire)
    }

    /// Raise every stored sub-span covered by `span` to `max(current, ts)`,
    /// splitting boundary sub-spans so the mapping remains a partition.
    ///
    /// Returns `Some(new_minimum)` iff the global minimum strictly
    /// increased, `None` otherwise. The returned minimum is **not**
    /// necessarily `ts` itself: another sub-span untouched by this call may
    /// already sit below `ts` and still be the true new minimum, so callers
    /// must use the returned value rather than assuming `ts` advanced the
    /// frontier to `ts`.
    pub fn forward(&self, span: &Span, ts: Ts) -> Option<Ts> {
        let before = self.frontier();

        let overlapping: Vec<(Bytes, Bytes, Ts)> = self
            .spans
            .iter()
            .filter_map(|e| {
                let sub_end = e.value().end.clone();
                let sub = Span {
                    start: e.key().clone(),
                    end: sub_end.clone(),
                };
                sub.overlaps(span)
                    .then(|| (e.key().clone(), sub_end, e.value().ts.load(Ordering::Acquire)))
            })
            .collect();

        if overlapping.is_empty() {
            return None;
        }

        for (start, end, cur_ts) in overlapping {
            if ts <= cur_ts {
                continue;
            }
            self.spans.remove(&start);

            let mid_start = start.clone().max(span.start.clone());
            let mid_end = end.clone().min(span.end.clone());

            if start < mid_start {
                self.insert_non_empty(start, mid_start.clone(), cur_ts);
            }
            self.insert_non_empty(mid_start, mid_end.clone(), ts);
            if mid_end < end {
                self.insert_non_empty(mid_end, end, cur_ts);
            }
        }

        let after = self.recompute_min();
        trace!(?span, ts, before, after, "span frontier forward");
        (after > before).then_some(after)
    }

    fn insert_non_empty(&self, start: Bytes, end: Bytes, ts: Ts) {
        if start < end {
            self.spans.insert(
                start,
                SubSpan {
                    end,
                    ts: AtomicU64::new(ts),
                },
            );
        }
    }

    fn recompute_min(&self) -> Ts {
        let m = self
            .spans
            .iter()
            .map(|e| e.value().ts.load(Ordering::Acquire))
            .min()
            .unwrap_or(u64::MAX);
        self.min.store(m, Ordering::Release);
        m
    }

    /// The current partition, for tests and diagnostics.
    pub fn spans(&self) -> Vec<(Span, Ts)> {
        self.spans
            .iter()
            .map(|e| {
                (
                    Span::new(e.key().clone(), e.value().end.clone()),
                    e.value().ts.load(Ordering::Acquire),
                )
            })
            .collect()
    }
}

impl fmt::Debug for SpanFrontier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanFrontier")
            .field("frontier", &self.frontier())
            .field("spans", &self.spans())
            .finish()
    }
}
