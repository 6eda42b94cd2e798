//! Requests between members and the dispatcher serving them.
mod handler;
pub use handler::RequestHandler;

pub mod types;
pub use types::Envelope;
pub use types::KeyEntry;
pub use types::Operation;
