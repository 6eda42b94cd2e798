#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
pub mod callback;
pub mod connection_ref;
pub mod connections;
pub mod core;
pub mod error;
pub mod limiter;
pub mod pool;
