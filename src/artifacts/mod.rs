//! Git data structures and algorithms
//!
//! This module contains the pure, I/O-free core:
//!
//! - `objects`: Git object types (blob, tree, commit, tag)
//! - `pack`: pack file reader/writer and delta application
//! - `negotiation`: fetch closure computation and push validation

pub mod negotiation;
pub mod objects;
pub mod pack;
