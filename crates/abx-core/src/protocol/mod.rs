//! Wire protocols spoken with the agent process over stdio.
//!
//! Both clients share the same transport discipline: one JSON object per
//! newline-terminated UTF-8 line, and a single async mutex held across
//! write+drain so at most one request/response cycle is in flight per pipe.

pub mod line;
pub mod rpc;
