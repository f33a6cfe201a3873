//! # Map Provider
//!
//! Source of elevation submaps in pull mode. The node asks the provider for the region around the
//! robot each time an update is triggered.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Duration;

use comms_if::{eqpt::grid_map::SubmapRequest, net::{zmq, MonitoredSocketError}};

use crate::{cancel::CancelToken, grid_map::{GridMap, GridMapError}};

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod submap_client;

pub use submap_client::SubmapClient;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Something elevation submaps can be requested from.
pub trait MapProvider: Send {
    /// Block until the provider can be reached, for at most `timeout`.
    ///
    /// Returns [`ProviderError::Unavailable`] if the timeout expires, or
    /// [`ProviderError::Cancelled`] if `cancel` is cancelled first.
    fn wait_for_existence(
        &mut self,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<(), ProviderError>;

    /// Request a submap from the provider.
    fn get_submap(&mut self, request: &SubmapRequest) -> Result<GridMap, ProviderError>;
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("The provider could not be reached within {0:?}")]
    Unavailable(Duration),

    #[error("Waiting for the provider was cancelled")]
    Cancelled,

    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("The client is not connected to the provider")]
    NotConnected,

    #[error("Could not send the request to the provider: {0}")]
    SendError(zmq::Error),

    #[error("Could not recieve a message from the provider: {0}")]
    RecvError(zmq::Error),

    #[error("The provider didn't respond in time")]
    NoResponse,

    #[error("Could not serialize the request: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not deserialize the response from the provider: {0}")]
    DeserializeError(serde_json::Error),

    #[error("The provider responded with a message which was not valid UTF-8")]
    NonUtf8Response,

    #[error("The provider returned an error: {0}")]
    ProviderError(String),

    #[error("The provider returned a malformed map: {0}")]
    MalformedMap(GridMapError),

    #[error("The provided map is missing the \"{0}\" layer")]
    MissingLayer(String),
}
