//! Data model for a single puller: what a region feed produces, and what the
//! puller's own output stream produces. These are kept as two distinct enums
//! (rather than one type with optional fields) so that a resolved-ts marker
//! can never be mistaken for a row mutation missing its key: the two shapes
//! are not representable by the same variant.

use bytes::Bytes;
use span_util::Span;

use span_frontier::Ts;

/// A row-level mutation observed on a region feed. Never a resolved-ts
/// watermark; see [`RegionFeedEvent::Resolved`] for that.
#[derive(Debug, Clone)]
pub enum RowMutation {
    Put {
        key: Bytes,
        value: Bytes,
        old_value: Option<Bytes>,
        start_ts: Ts,
        crts: Ts,
        region_id: u64,
    },
    Delete {
        key: Bytes,
        old_value: Option<Bytes>,
        start_ts: Ts,
        crts: Ts,
        region_id: u64,
    },
}

impl RowMutation {
    pub fn key(&self) -> &Bytes {
        match self {
            RowMutation::Put { key, .. } | RowMutation::Delete { key, .. } => key,
        }
    }

    pub fn crts(&self) -> Ts {
        match self {
            RowMutation::Put { crts, .. } | RowMutation::Delete { crts, .. } => *crts,
        }
    }

    pub fn region_id(&self) -> u64 {
        match self {
            RowMutation::Put { region_id, .. } | RowMutation::Delete { region_id, .. } => {
                *region_id
            }
        }
    }

    /// Rough accounting size in bytes, used by the memory quota. Includes a
    /// fixed per-entry overhead so an all-empty-payload mutation still costs
    /// something.
    pub fn approx_size(&self) -> usize {
        const OVERHEAD: usize = 64;
        let payload = match self {
            RowMutation::Put {
                key,
                value,
                old_value,
                ..
            } => key.len() + value.len() + old_value.as_ref().map_or(0, Bytes::len),
            RowMutation::Delete { key, old_value, .. } => {
                key.len() + old_value.as_ref().map_or(0, Bytes::len)
            }
        };
        OVERHEAD + payload
    }
}

/// One event delivered by a single region's feed: either a row mutation, or
/// that region's own resolved-ts watermark for the span it was serving.
#[derive(Debug, Clone)]
pub enum RegionFeedEvent {
    Val(RowMutation),
    Resolved { span: Span, ts: Ts },
}

impl RegionFeedEvent {
    pub fn approx_size(&self) -> usize {
        const MARKER_SIZE: usize = 64;
        match self {
            RegionFeedEvent::Val(m) => m.approx_size(),
            RegionFeedEvent::Resolved { .. } => MARKER_SIZE,
        }
    }
}

/// An entry on the puller's final output stream: a row mutation, or a global
/// resolved-ts watermark. Unlike [`RegionFeedEvent::Resolved`] this marker
/// carries no span: by the time it reaches the output it has already been
/// folded into the single global minimum.
#[derive(Debug, Clone)]
pub enum RawKVEntry {
    Put {
        key: Bytes,
        value: Bytes,
        old_value: Option<Bytes>,
        start_ts: Ts,
        crts: Ts,
        region_id: u64,
    },
    Delete {
        key: Bytes,
        old_value: Option<Bytes>,
        start_ts: Ts,
        crts: Ts,
        region_id: u64,
    },
    Resolved {
        crts: Ts,
    },
}

impl RawKVEntry {
    pub fn crts(&self) -> Ts {
        match self {
            RawKVEntry::Put { crts, .. }
            | RawKVEntry::Delete { crts, .. }
            | RawKVEntry::Resolved { crts } => *crts,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, RawKVEntry::Resolved { .. })
    }
}

impl From<RowMutation> for RawKVEntry {
    fn from(m: RowMutation) -> Self {
        match m {
            RowMutation::Put {
                key,
                value,
                old_value,
                start_ts,
                crts,
                region_id,
            } => RawKVEntry::Put {
                key,
                value,
                old_value,
                start_ts,
                crts,
                region_id,
            },
            RowMutation::Delete {
                key,
                old_value,
                start_ts,
                crts,
                region_id,
            } => RawKVEntry::Delete {
                key,
                old_value,
                start_ts,
                crts,
                region_id,
            },
        }
    }
}
