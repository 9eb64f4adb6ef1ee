//! cag-bridge: cache-augmented generation bridge.
//!
//! Builds llama.cpp KV caches for documents, keeps a shared master cache,
//! answers queries against saved caches, and reports the cache inventory
//! joined with the usage registry. Inference itself happens in external
//! scripts; this crate decides how they are called and what their results mean.

pub mod cache;
pub mod config;
pub mod error;
pub mod inference;
pub mod registry;
pub mod server;

pub use error::{CagError, ErrorKind, Result};
