//! The main concepts of this mod are:
//!
//! The [ConnectionInterface](transport::ConnectionInterface) trait defines how to
//! send a framed message to one remote peer and close the link.
//! See the [transport] module.
//!
//! The [TransportInterface](transport::TransportInterface) trait should be
//! implemented for each Transport of Connection implementation. It dials peers,
//! keeps the pool of open connections and applies the dial guards configured in
//! [TransportConfig](transport::TransportConfig). See the [transport] module.
//!
//! The [TransportCallback](callback::TransportCallback) trait is used to let user handle
//! the events of a connection, including connection state change,
//! incoming message and etc. See the [callback] module.

pub mod callback;
pub mod transport;
