//! # Traversability Executable
//!
//! This executable estimates the traversability of the terrain around the robot:
//! - Elevation maps are pulled from a submap provider, or pushed by an elevation stream
//! - Traversability is computed from them periodically or on demand
//! - Clients query the result through the request server

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use std::sync::Arc;

use color_eyre::{eyre::WrapErr, Result};
use comms_if::net::{zmq, NetParams};
use log::{info, warn};

// Internal
use trav_lib::{
    cancel,
    engine::{params::EngineParams, FilterEngine},
    node::TravNode,
    params::TravExecParams,
    provider::SubmapClient,
    reload::FileConfigService,
    storage::MapStore,
    stream_client::StreamClient,
    tf::TransformBuffer,
    trav_server::TravServer,
};
use util::{
    host,
    logger::{logger_init, parse_level, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Environment variable which overrides the log level
const LOG_LEVEL_ENV_VAR: &str = "TRAV_LOG_LEVEL";

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("trav_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    let log_level = match std::env::var(LOG_LEVEL_ENV_VAR) {
        Ok(l) => parse_level(&l).wrap_err("Invalid log level")?,
        Err(_) => LevelFilter::Debug,
    };
    logger_init(log_level, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Traversability Executable\n");
    if let Some(hostname) = host::get_hostname() {
        info!("Running on: {}", hostname);
    }
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let params: TravExecParams =
        util::params::load("trav_exec.toml").wrap_err("Failed to load trav_exec parameters")?;
    let net_params: NetParams =
        util::params::load("net.toml").wrap_err("Failed to load network parameters")?;
    let engine_params = EngineParams::load(&params.filters_file, &params.footprint_file)
        .wrap_err("Failed to load engine parameters")?
        .into_shared();

    info!("Parameters loaded");

    // ---- NODE INITIALISATION ----

    let engine = FilterEngine::new(engine_params.clone(), &params.map_frame_id)
        .wrap_err("Failed to initialise the traversability engine")?;

    let tf = Arc::new(TransformBuffer::new(
        &params.static_transforms,
        params.transform_max_age_s,
    ));

    let config = FileConfigService::new(&params.filters_file, &params.footprint_file, engine_params);

    let sw_root = host::get_sw_root().wrap_err("Failed to get the software root")?;
    let store = MapStore::new(&params.storage, &sw_root);

    let zmq_ctx = zmq::Context::new();

    let provider = SubmapClient::new(
        &zmq_ctx,
        &net_params,
        util::time::secs_to_duration(params.provider_timeout_s),
    )
    .wrap_err("Failed to initialise the submap client")?;

    let node = Arc::new(TravNode::new(
        &params,
        Box::new(engine),
        Box::new(provider),
        tf,
        Box::new(config),
        store,
    ));

    info!("Node initialised");

    // ---- NETWORK INITIALISATION ----

    let mut server =
        TravServer::new(&zmq_ctx, &net_params).wrap_err("Failed to initialise the server")?;

    let mut stream_client = match net_params.elevation_stream_endpoint {
        Some(ref endpoint) => Some(
            StreamClient::start(&zmq_ctx, endpoint, node.clone())
                .wrap_err("Failed to initialise the elevation stream client")?,
        ),
        None => {
            info!("No elevation stream configured, elevation maps will be pulled");
            None
        }
    };

    // SIGINT/SIGTERM stop the server loop, after which the node is shut down below
    cancel::install_signal_handler(node.cancel_token())
        .wrap_err("Failed to set the shutdown signal handler")?;

    node.start_scheduler()
        .wrap_err("Failed to start the update scheduler")?;

    // ---- MAIN LOOP ----

    info!("Initialisation complete, entering main loop");

    let result = server.run(&node, &node.cancel_token());

    // ---- SHUTDOWN ----

    if let Err(ref e) = result {
        warn!("Server stopped with an error: {}", e);
    }

    node.shutdown();
    if let Some(ref mut s) = stream_client {
        s.join();
    }

    info!("End of execution");

    result.wrap_err("Server error")
}
