//! ChordRing: a Chord distributed hash table over any peer to peer transport.
//! --------------
//! - [RingId](crate::dht::RingId) is a 256 bit position on the ring, the SHA-256 digest of a peer id.
//! - [PeerRing](crate::dht::PeerRing) holds finger table, successor list and predecessor.
//!   It is pure state and answers with actions for the caller to perform.
//! - [LocalNode](crate::node::LocalNode) performs those actions through
//!   [member handles](crate::peer::PeerHandle) and runs the maintenance loops of
//!   [Stabilizer](crate::dht::Stabilizer).
//! - [RequestHandler](crate::message::RequestHandler) correlates requests with responses
//!   and serves the requests of other members.
//! - [Chord](crate::chord::Chord) is the surface exposed to applications.
//!
//! # Join
//!
//! When node A joins through node B:
//!
//! 1. A asks B for the successor of its own ring id. B answers directly when
//!    the id falls between itself and its successor, and forwards the lookup to
//!    the closest preceding member it knows otherwise.
//! 2. A adopts the answer S as successor and stabilizes: it reads the predecessor
//!    and successor list of S, then notifies S.
//! 3. S adopts A as predecessor and hands over the keys A is now responsible for.
//!
//! Periodic stabilization repairs pointers after concurrent joins, departures and
//! failures. Lookups stay correct with stale fingers, only slower.
//!
//! # Wire format
//!
//! ```txt
//! Request:  { "type": "request", "id": 1, "op": "findSuccessor", "args": ["<hex>"] }
//! Response: { "type": "response", "id": 1, "ok": true, "result": { "peerId": "..", "ringId": ".." } }
//! ```
pub mod chord;
pub mod config;
pub mod consts;
pub mod dht;
pub mod error;
pub mod inspect;
pub mod logging;
pub mod message;
pub mod node;
pub mod peer;
pub mod storage;
pub mod transport;

#[cfg(test)]
mod tests;

pub use chord::Chord;
pub use config::ChordConfig;
pub use error::Error;
pub use error::ErrorKind;
pub use error::Result;
