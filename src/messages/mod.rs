//! Per-channel message logs.
//!
//! [`MsgLog`] holds the bookkeeping every backend shares: sequence bounds,
//! the last minted timestamp, running totals and the quota checks. Backends
//! compose it and implement [`MsgStore`] for the physical side.

mod log;

pub use log::{dropping_msgs_report, EvictReason, MsgLog, MsgLogState, MsgStore, OldestFirst};
