//! Git Smart HTTP wire protocol
//!
//! - `pkt_line`: length-prefixed framing shared by every message
//! - `advertisement`: `info/refs` service advertisement
//! - `upload_pack`: fetch negotiation messages
//! - `receive_pack`: push commands and status reports

pub mod advertisement;
pub mod pkt_line;
pub mod receive_pack;
pub mod upload_pack;
