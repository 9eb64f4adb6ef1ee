//! KV cache artifacts and their lifecycle.
//!
//! - [`sizing`]: Quantized context-window computation
//! - [`naming`]: Deterministic cache file locations
//! - [`files`]: Idempotent directory creation, atomic copies, cleanup
//! - [`lifecycle`]: Create → verify → promote → clean up orchestration

pub mod files;
pub mod lifecycle;
pub mod naming;
pub mod sizing;
