//! Shared wire types and errors for the livesync client and anything that
//! speaks its notification channel protocol.

pub mod error;
pub mod protocol;

pub use error::*;
pub use protocol::*;
