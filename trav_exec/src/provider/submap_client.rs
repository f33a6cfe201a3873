//! # Submap Client
//!
//! Requests elevation submaps from a remote grid map server over ZMQ.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    convert::TryFrom,
    time::{Duration, Instant},
};

use comms_if::{
    eqpt::grid_map::{GridMapCmd, GridMapRep, SubmapRequest},
    net::{zmq, MonitoredSocket, NetParams, SocketOptions},
};
use log::{debug, trace};

use super::{MapProvider, ProviderError};
use crate::{cancel::CancelToken, grid_map::GridMap};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Interval at which the connection state is polled while waiting for the provider.
const CONNECTION_POLL_INTERVAL: Duration = Duration::from_millis(50);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// ZMQ client for a remote submap provider.
pub struct SubmapClient {
    /// Request-response socket for submap requests
    reqrep: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SubmapClient {
    /// Create a new client.
    ///
    /// This function doesn't wait for the provider to be reachable. Responses are waited for up to
    /// `response_timeout`.
    pub fn new(
        ctx: &zmq::Context,
        params: &NetParams,
        response_timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let reqrep_opts = SocketOptions {
            block_on_first_connect: false,
            connect_timeout: 1000,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            linger: 1,
            recv_timeout: response_timeout.as_millis() as i32,
            send_timeout: 10,
            req_correlate: true,
            req_relaxed: true,
            ..Default::default()
        };

        let reqrep = MonitoredSocket::new(ctx, zmq::REQ, reqrep_opts, &params.submap_endpoint)
            .map_err(ProviderError::SocketError)?;

        Ok(Self { reqrep })
    }
}

impl MapProvider for SubmapClient {
    fn wait_for_existence(
        &mut self,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<(), ProviderError> {
        let start = Instant::now();

        loop {
            if self.reqrep.connected() {
                return Ok(());
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(ProviderError::Unavailable(timeout));
            }

            if cancel.wait_timeout(CONNECTION_POLL_INTERVAL.min(timeout - elapsed)) {
                return Err(ProviderError::Cancelled);
            }
        }
    }

    fn get_submap(&mut self, request: &SubmapRequest) -> Result<GridMap, ProviderError> {
        if !self.reqrep.connected() {
            return Err(ProviderError::NotConnected);
        }

        let request_str = serde_json::to_string(&GridMapCmd::GetSubmap(request.clone()))
            .map_err(ProviderError::SerializationError)?;

        self.reqrep
            .send(&request_str, 0)
            .map_err(ProviderError::SendError)?;
        trace!("Submap requested: {:?}", request);

        let response_str = match self.reqrep.recv_string(0) {
            // Valid response
            Ok(Ok(s)) => s,
            // Invalid response
            Ok(Err(_)) => return Err(ProviderError::NonUtf8Response),
            // No response
            Err(zmq::Error::EAGAIN) => return Err(ProviderError::NoResponse),
            // Recv error
            Err(e) => return Err(ProviderError::RecvError(e)),
        };

        let response: GridMapRep =
            serde_json::from_str(&response_str).map_err(ProviderError::DeserializeError)?;

        match response {
            GridMapRep::Submap(msg) => {
                let map = GridMap::try_from(msg).map_err(ProviderError::MalformedMap)?;
                debug!(
                    "Recieved {} x {} m submap in \"{}\" with layers {:?}",
                    map.length().x,
                    map.length().y,
                    map.frame_id(),
                    map.layers()
                );
                Ok(map)
            }
            GridMapRep::Error(e) => Err(ProviderError::ProviderError(e)),
        }
    }
}
