//! Fans in per-region change-data feeds, subject to a byte-accounted memory
//! quota and a fixed-capacity channel buffer, into a single output stream
//! interleaved with a monotonically non-decreasing global resolved
//! timestamp.

mod chan_buffer;
mod client;
mod config;
mod driver;
mod error;
mod mem_buffer;
mod metrics;
mod model;
mod sorter;

pub use chan_buffer::ChanBuffer;
pub use client::{CdcClient, DirectoryClient};
pub use config::PullerConfig;
pub use driver::Puller;
pub use error::PullerError;
pub use metrics::PullerMetrics;
pub use model::{RawKVEntry, RegionFeedEvent, RowMutation};
pub use sorter::SorterOutput;

pub use span_frontier::Ts;
pub use span_util::{IdentityKeyEncoder, KeyEncoder, Span};
