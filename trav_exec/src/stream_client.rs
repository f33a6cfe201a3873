//! # Elevation Stream Client
//!
//! Subscribes to a published stream of elevation frames and feeds them to the node on a
//! background thread.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    convert::TryFrom,
    sync::Arc,
    thread::{self, JoinHandle},
};

use comms_if::{
    eqpt::elevation::{ElevationFrame, ElevationImage, ElevationFrameError},
    net::{zmq, MonitoredSocket, MonitoredSocketError, SocketOptions},
};
use log::{debug, error, info, warn};

use crate::{cancel::CancelToken, node::TravNode};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Timeout on frame recieves, bounds how long shutdown can take to be noticed.
const RECV_TIMEOUT_MS: i32 = 100;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct StreamClient {
    bg_jh: Option<JoinHandle<()>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not deserialize the frame: {0}")]
    DeserializeError(serde_json::Error),

    #[error("Could not decode the frame: {0}")]
    FrameError(ElevationFrameError),

    #[error("Recieved a frame which was not valid UTF-8")]
    NonUtf8Frame,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StreamClient {
    /// Connect to the stream publisher and start feeding frames to `node` until its cancel token
    /// is cancelled.
    pub fn start(
        ctx: &zmq::Context,
        endpoint: &str,
        node: Arc<TravNode>,
    ) -> Result<Self, StreamClientError> {
        let socket_options = SocketOptions {
            block_on_first_connect: false,
            subscribe: Some(Vec::new()),
            connect_timeout: 1000,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            linger: 1,
            recv_timeout: RECV_TIMEOUT_MS,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(ctx, zmq::SUB, socket_options, endpoint)
            .map_err(StreamClientError::SocketError)?;

        info!("Subscribed to the elevation stream at {}", endpoint);

        let cancel = node.cancel_token();
        let bg_jh = Some(thread::spawn(move || bg_thread(socket, node, cancel)));

        Ok(Self { bg_jh })
    }

    /// Wait for the background thread to stop.
    pub fn join(&mut self) {
        if let Some(jh) = self.bg_jh.take() {
            if jh.join().is_err() {
                error!("Elevation stream thread panicked");
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Decode a raw stream message into an elevation image.
pub fn decode_frame(msg: &str) -> Result<ElevationImage, StreamClientError> {
    let frame: ElevationFrame =
        serde_json::from_str(msg).map_err(StreamClientError::DeserializeError)?;

    ElevationImage::try_from(frame).map_err(StreamClientError::FrameError)
}

fn bg_thread(socket: MonitoredSocket, node: Arc<TravNode>, cancel: CancelToken) {
    while !cancel.is_cancelled() {
        let msg = match socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => {
                warn!("{}", StreamClientError::NonUtf8Frame);
                continue;
            }
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => {
                error!("Elevation stream recieve failed, stopping the stream: {}", e);
                break;
            }
        };

        let image = match decode_frame(&msg) {
            Ok(i) => i,
            Err(e) => {
                warn!("Dropping elevation frame: {}", e);
                continue;
            }
        };

        match node.on_stream_frame(&image) {
            Ok(()) => debug!("Elevation frame processed"),
            Err(e) => warn!("Couldn't process elevation frame: {}", e),
        }
    }

    debug!("Elevation stream thread stopped");
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
