#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::todo,
    clippy::use_self,
    missing_debug_implementations
)]

//! In-memory chunk flush engine for a multi-tenant time-series ingester.
//!
//! The ingester holds, per tenant, a population of in-memory series, each a
//! sequence of append-only chunks of samples. This crate decides when those
//! chunks must be durably persisted, schedules the work fairly across
//! millions of series, executes it against a [`ChunkStore`], and releases
//! memory once flushed chunks age out of their retention window, all while
//! the write path keeps appending to the same series.
//!
//! ## Topology
//!
//! ```text
//!                  ┌─────────┐  periodic / shutdown / HTTP
//!                  │ Sweeper │
//!                  └────┬────┘
//!          policy per series, op on shard fp % n
//!         ┌─────────────┼─────────────┐
//!         ▼             ▼             ▼
//!   ┌──────────┐  ┌──────────┐  ┌──────────┐
//!   │ Queue 0  │  │ Queue 1  │  │ Queue n-1│   priority + dedup
//!   └────┬─────┘  └────┬─────┘  └────┬─────┘
//!        ▼             ▼             ▼
//!   ┌──────────┐  ┌──────────┐  ┌──────────┐
//!   │ Worker 0 │  │ Worker 1 │  │ Worker n-1│
//!   └────┬─────┘  └────┬─────┘  └────┬─────┘
//!        └─────────────┼─────────────┘
//!                      ▼
//!                 ChunkStore::put
//! ```
//!
//! Each series is pinned to one queue, so flushes of a single series are
//! serialized while distinct series flush in parallel. Workers re-check the
//! flush policy under the series lock before shipping anything, because an
//! op may sit in its queue long enough for the world to change; the lock is
//! never held across the store call.
//!
//! The write path (sample append, series creation), the WAL, and the chunk
//! encoding are external collaborators: this crate consumes the shared
//! [`UserStates`] map they populate.

pub mod chunk;
pub mod flush;
pub mod http;
pub mod limits;
pub mod series;
pub mod state;
pub mod store;

#[cfg(test)]
mod test_util;

pub use chunk::{ChunkDesc, ChunkPayload, EncodeError, Fingerprint};
pub use flush::{FlushConfig, FlushError, FlushReason, Flusher};
pub use limits::{FixedLimits, Limits};
pub use series::{Labels, MemorySeries};
pub use state::{UserState, UserStates};
pub use store::{ChunkStore, StoreError, WireChunk};
