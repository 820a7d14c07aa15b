//! Git LFS support
//!
//! - `pointer`: the small text stand-in committed in place of oversize payloads
//! - `batch`: the batch API that negotiates presigned transfer URLs

pub mod batch;
pub mod pointer;
