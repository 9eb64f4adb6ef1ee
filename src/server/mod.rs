//! HTTP surface of the bridge.
//!
//! - [`bridge_api`]: Request/response types and route handlers
//! - [`health`]: Collaborator checks behind `GET /health`

pub mod bridge_api;
pub mod health;
