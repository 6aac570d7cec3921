//! Configuration graph derivation and storage

pub mod builder;
pub mod store;

pub use builder::{Build, GraphBuilder};
pub use store::{GraphStore, Lookup, Publish};
