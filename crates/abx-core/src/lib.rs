//! Core ABX library (sessions, protocols, stream decoding, config).

pub mod config;
pub mod conversation;
pub mod error;
pub mod interrupt;
pub mod process;
pub mod protocol;
pub mod remote;
pub mod session;
pub mod stream;
