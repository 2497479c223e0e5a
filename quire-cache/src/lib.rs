//! TTL store and single-flight request coalescing for Quire.
//!
//! [`TtlStore`] is a generic in-memory map with per-entry expiration.
//! [`Coalescer`] uses it as the coordination medium that lets N identical
//! concurrent render requests share one render.

mod coalesce;
mod config;
mod store;

pub use coalesce::{Coalescer, CoalescerStats, Flight, Lookup, Slot};
pub use config::CacheConfig;
pub use store::{Claim, StoreStats, TtlStore};

/// Store type used for render coordination.
pub type RenderStore = TtlStore<quire_core::Fingerprint, Slot>;
