//! I/O-bearing capabilities
//!
//! Everything with side effects lives here, behind traits so the protocol
//! core stays testable without a running backend:
//!
//! - `backend`: the external version-control backend capability
//! - `object_store`: the LFS payload store capability
//! - `bridge`: the Git <-> backend translation layer, the only caller of both
//! - `memory_backend`: in-memory implementations for tests and fixtures
//! - `rest_backend`: REST implementations used by the server binary

pub mod backend;
pub mod bridge;
pub mod memory_backend;
pub mod object_store;
pub mod rest_backend;
