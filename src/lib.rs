//! brig: a Git Smart HTTP bridge over a transactional versioned backend
//!
//! Serves clone, fetch, and push for repositories whose durable state lives
//! in an external version-control backend with a flat path-keyed model,
//! with oversize payloads in an S3-compatible object store reached through
//! presigned URLs (Git LFS).
//!
//! Layering, leaves first:
//!
//! - [`artifacts`]: the pure core (object model, pack codec, negotiation)
//! - [`protocol`]: pkt-line framing and Smart HTTP message assembly
//! - [`lfs`]: pointer files and the batch API
//! - [`areas`]: capabilities with I/O (backend, payload store, the bridge)
//! - [`server`]: the axum surface
//!
//! The whole protocol stack runs against any [`areas::backend::Backend`]
//! implementation; tests use the in-memory one.

pub mod areas;
pub mod artifacts;
pub mod config;
pub mod errors;
pub mod lfs;
pub mod protocol;
pub mod server;
