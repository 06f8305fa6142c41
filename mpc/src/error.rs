use std::fmt;

use arithmpc_common::share::ShareError;
use arithmpc_network::{NetworkError, PartyId};
use thiserror::Error;

use crate::wire::WireError;

/// The individual SPDZ consistency checks run by the dealer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacCheck {
    /// The MAC on the opened sum of all secrets.
    AdditionSum,
    /// The MAC on the opened product.
    Product,
    /// The batched zero check on the partial opening of the multiplication.
    PartialOpening,
}

impl fmt::Display for MacCheck {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MacCheck::AdditionSum => "addition sum MAC check",
            MacCheck::Product => "product MAC check",
            MacCheck::PartialOpening => "partial opening zero check",
        };
        formatter.write_str(name)
    }
}

/// Error type for the protocol layer.
#[derive(Debug, Error)]
pub enum MpcError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("network error: {0}")]
    Network(#[from] NetworkError),
    #[error("wire format error: {0}")]
    Wire(#[from] WireError),
    #[error("share error: {0}")]
    Share(#[from] ShareError),
    /// A SPDZ check failed; the computation must abort.
    #[error("MAC verification failed: {0}")]
    MacFailure(MacCheck),
    #[error("timed out waiting for {what} from party {peer}")]
    Timeout { peer: PartyId, what: &'static str },
    #[error("protocol violation from party {peer}: {detail}")]
    Protocol { peer: PartyId, detail: String },
}
