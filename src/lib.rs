//! This crate contains the implementation of a small in-memory key-value server that speaks a
//! Redis-like serialization protocol (RESP). Scalar values, per-key expiry and lists are kept in
//! a sharded, thread-safe storage engine that every client connection shares. A client and a
//! server are provided for interacting with the storage through network connections, and a
//! minimal set of Redis's commands is supported.

#![deny(rust_2018_idioms)]
#![warn(missing_docs)]

pub mod conf;
pub mod net;
mod shutdown;
pub mod storage;
pub mod telemetry;

/// Default port address of the service
pub const DEFAULT_PORT: u16 = 6379;
