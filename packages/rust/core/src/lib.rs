//! Batch orchestration for sitesort.
//!
//! This crate turns a raw domain list into classification results:
//! normalization ([`normalize`]), dedup against stored results ([`dedup`]),
//! a bounded worker pool ([`scheduler`]) running the per-domain state
//! machine ([`task`]), batch accounting ([`tracker`]) and the progress
//! stream ([`events`], [`transport`]). [`Pipeline`] ties them together.

pub mod dedup;
pub mod events;
pub mod normalize;
pub mod pipeline;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod tracker;
pub mod transport;

#[cfg(test)]
mod testing;

pub use events::{BatchSummary, Emitter, ProgressEvent};
pub use normalize::{NormalizedInput, RejectedDomain, normalize_domains};
pub use pipeline::Pipeline;
pub use scheduler::{Collaborators, effective_concurrency};
pub use store::ResultStore;
pub use transport::{Framing, encode_event, forward_events};
pub use tokio_util::sync::CancellationToken;
