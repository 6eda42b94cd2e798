#![warn(missing_docs)]
//! Implementation of the Chord ring,
//! ref: <https://pdos.csail.mit.edu/papers/ton:chord/paper-ton.pdf>
//! With high probability, the number of nodes that must be contacted to find a successor in an N-node network is O(log N).

mod chord;
/// Finger table of the ring
pub mod finger;
pub mod id;
mod stabilization;
pub mod successor;
pub mod types;

pub use chord::PeerRing;
pub use chord::PeerRingAction;
pub use chord::RemoteAction as PeerRingRemoteAction;
pub use finger::FingerTable;
pub use id::BiasId;
pub use id::RingId;
pub use stabilization::Routine;
pub use stabilization::Stabilizer;
pub use successor::SuccessorReader;
pub use successor::SuccessorSeq;
pub use successor::SuccessorWriter;
pub use types::Chord;
pub use types::NodeInfo;
