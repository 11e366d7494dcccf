//! Shared on-disk artifact cache
//!
//! Artifacts are published atomically: bytes land in a private staging file
//! and are renamed to their canonical path only after verification.
//!
//! # Entry States
//!
//! | State | Visible to lookup | Description |
//! |-------|-------------------|-------------|
//! | Absent | no | Nothing published for the key |
//! | Staging | no | Download in progress in `.staging/` |
//! | Complete | yes | Verified artifact at its canonical path |

pub mod entry;
pub mod store;

pub use entry::{format_bytes, ArtifactMetadata, CacheEntry, CacheState};
pub use store::{CacheStore, StagingArtifact};
