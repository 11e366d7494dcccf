//! Grab - concurrent-safe dependency artifact cache
//!
//! Resolves `group:module:version` coordinates to verified local files in a
//! shared cache directory. Any number of tasks and processes may resolve at
//! once; each artifact is fetched at most once and is never visible half written.

pub mod audit;
pub mod cache;
pub mod checksum;
pub mod cli;
pub mod config;
pub mod coordinate;
pub mod error;
pub mod fetch;
pub mod lock;
pub mod resolver;
pub mod ui;

pub use coordinate::{Coordinate, CoordinateKey};
pub use error::{GrabError, GrabResult};
pub use resolver::{ArtifactHandle, ArtifactOrigin, ResolveOptions, Resolver};
