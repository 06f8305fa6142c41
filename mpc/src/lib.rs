/// The dealer party: holds the secrets and drives the command sequence.
pub mod dealer;
pub mod error;
pub mod params;
/// Dealer-side generation of Beaver triples and MAC material.
pub mod preprocessing;
/// Command bytes and the pipe-delimited hex payload codec.
pub mod wire;
/// The worker event loop and its command handlers.
pub mod worker;

pub use dealer::{Dealer, SessionOutcome};
pub use error::{MacCheck, MpcError};
pub use params::ProtocolParams;
pub use worker::Worker;
