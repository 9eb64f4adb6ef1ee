//! Bridge to the external llama.cpp inference scripts.
//!
//! - [`invoker`]: Child-process execution with captured output and a bounded wait
//! - [`commands`]: Argument layouts for the create and query scripts
//! - [`query`]: Prompt formatting and query result assembly

pub mod commands;
pub mod invoker;
pub mod query;
