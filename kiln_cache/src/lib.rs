//! Content-addressed, signed, at-most-once action cache. See
//! `SPEC_FULL.md` §4.B–§4.D.

pub mod blob;
pub mod cache;
pub mod entry;
pub mod error;
pub mod identity;
pub mod signed;
pub mod store;

pub use blob::BlobStore;
pub use cache::{ActionCache, BuildPermit, CacheStats, Lookup, Reservation, DEFAULT_FAILURE_TTL_SECS};
pub use entry::ActionEntry;
pub use error::{CacheError, IntegrityError};
pub use identity::{compute_action_key, hash_inputs, ToolIdentity};
pub use store::{GetOutcome, SignedStore};
