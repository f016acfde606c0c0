//! A [`Span`] is a half-open byte range `[start, end)` with lexicographic
//! byte ordering. It is the unit of subscription for the puller: a puller is
//! configured with a set of spans and must never let data for a key outside
//! that set escape onto its output.

use std::fmt;

use bytes::Bytes;

/// A half-open byte-range key span `[start, end)`.
///
/// Ordering, equality, and hashing are all defined over `(start, end)` so
/// that spans can be stored in ordered structures keyed by their start byte,
/// per the frontier's representation (see `span_frontier`).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Span {
    pub start: Bytes,
    pub end: Bytes,
}

impl Span {
    /// Construct a new span. Panics in debug builds if `start > end`.
    pub fn new(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        let start = start.into();
        let end = end.into();
        debug_assert!(
            start <= end,
            "span start must not exceed end: {start:?}..{end:?}"
        );
        Self { start, end }
    }

    /// Whether `key` falls inside this span.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        key >= self.start.as_ref() && key < self.end.as_ref()
    }

    /// A span is empty when its start and end coincide; an empty span
    /// contains no keys.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether `self` fully covers `other`, i.e. every key in `other` is
    /// also in `self`.
    pub fn covers(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Whether the two spans share at least one key.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// The overlapping sub-range of `self` and `other`, or `None` if they do
    /// not overlap.
    pub fn intersect(&self, other: &Span) -> Option<Span> {
        let start = self.start.clone().max(other.start.clone());
        let end = self.end.clone().min(other.end.clone());
        (start < end).then(|| Span { start, end })
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", DisplayKey(&self.start), DisplayKey(&self.end))
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Prints a key as UTF-8 when it happens to be valid (common in tests and
/// demos), falling back to a hex dump otherwise.
struct DisplayKey<'a>(&'a [u8]);

impl fmt::Display for DisplayKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(self.0) {
            Ok(s) if s.chars().all(|c| !c.is_control()) => write!(f, "{s:?}"),
            _ => {
                write!(f, "0x")?;
                for b in self.0 {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// Whether a raw key observed on a region feed must be transformed before
/// it can be compared against a subscribed [`Span`].
///
/// Upstream region boundaries are expressed in an internal key encoding that
/// does not always match the encoding a subscriber's span was built from
/// (see spec.md §4.5's `needEncode`); a puller driver is handed a
/// `KeyEncoder` and applies it to every key before filtering.
pub trait KeyEncoder: Send + Sync {
    /// Encode `key` into the form comparable against subscribed spans.
    fn encode(&self, key: &[u8]) -> Bytes;
}

/// A [`KeyEncoder`] that performs no transformation, for subscribers whose
/// spans are already expressed in the upstream's native key encoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityKeyEncoder;

impl KeyEncoder for IdentityKeyEncoder {
    fn encode(&self, key: &[u8]) -> Bytes {
        Bytes::copy_from_slice(key)
    }
}
