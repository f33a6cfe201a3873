//! # Traversability Server
//!
//! Accepts [`TravCmd`] requests from remote clients and replies with the node's [`TravRep`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    eqpt::trav::{TravCmd, TravErrorKind, TravRep, TravServerError},
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};
use log::{info, trace, warn};

use crate::{cancel::CancelToken, node::TravNode};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Timeout on request recieves, bounds how long shutdown can take to be noticed.
const RECV_TIMEOUT_MS: i32 = 200;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct TravServer {
    /// REP socket requests are recieved on
    reqrep: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not recieve a request: {0}")]
    RecvError(zmq::Error),

    #[error("Could not send the reply: {0}")]
    SendError(zmq::Error),

    #[error("Could not serialize the reply: {0}")]
    SerializationError(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TravServer {
    /// Bind the server to its endpoint. Doesn't wait for any clients.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, ServerError> {
        let reqrep_opts = SocketOptions {
            bind: true,
            block_on_first_connect: false,
            recv_timeout: RECV_TIMEOUT_MS,
            send_timeout: 10,
            linger: 1,
            ..Default::default()
        };

        let reqrep = MonitoredSocket::new(
            ctx,
            zmq::REP,
            reqrep_opts,
            &params.trav_server_endpoint,
        )
        .map_err(ServerError::SocketError)?;

        info!("Traversability server bound to {}", params.trav_server_endpoint);

        Ok(Self { reqrep })
    }

    /// Serve requests until `cancel` is cancelled.
    pub fn run(&mut self, node: &TravNode, cancel: &CancelToken) -> Result<(), ServerError> {
        while !cancel.is_cancelled() {
            let request_str = match self.reqrep.recv_string(0) {
                Ok(Ok(s)) => s,
                Ok(Err(_)) => {
                    warn!("Recieved a request which was not valid UTF-8");
                    self.reply(&invalid_request("request is not valid UTF-8".into()))?;
                    continue;
                }
                Err(zmq::Error::EAGAIN) => continue,
                Err(e) => return Err(ServerError::RecvError(e)),
            };

            let rep = match serde_json::from_str::<TravCmd>(&request_str) {
                Ok(cmd) => node.handle(cmd),
                Err(e) => {
                    warn!("Could not deserialize request: {}", e);
                    invalid_request(format!("could not deserialize request: {}", e))
                }
            };

            self.reply(&rep)?;
        }

        info!("Traversability server stopped");

        Ok(())
    }

    fn reply(&mut self, rep: &TravRep) -> Result<(), ServerError> {
        let rep_str = serde_json::to_string(rep).map_err(ServerError::SerializationError)?;

        match self.reqrep.send(&rep_str, 0) {
            Ok(()) => {
                trace!("Reply sent");
                Ok(())
            }
            // The client has gone, the socket is ready for the next request
            Err(zmq::Error::EAGAIN) => {
                warn!("Client didn't take the reply");
                Ok(())
            }
            Err(e) => Err(ServerError::SendError(e)),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn invalid_request(message: String) -> TravRep {
    TravRep::Error(TravServerError {
        kind: TravErrorKind::InvalidInput,
        message,
    })
}
