//! # Traversability library.
//!
//! Acquires elevation maps, has them turned into traversability maps by an engine, and answers
//! queries against the result. The `trav_exec` executable wires these together behind a request
//! server.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Acquisition mode and streamed elevation accumulation
pub mod acq;

/// Shutdown signalling
pub mod cancel;

/// Traversability engine interface and reference implementation
pub mod engine;

/// Errors returned by the node's operations
pub mod error;

/// Multi-layer grid maps
pub mod grid_map;

/// The node, which owns everything else
pub mod node;

/// Drives the acquire then compute update cycle
pub mod orchestrator;

/// Parameters for the traversability executable
pub mod params;

/// Sources of elevation submaps
pub mod provider;

/// Queries against the current traversability map
pub mod query;

/// Engine configuration reload
pub mod reload;

/// Periodic updates
pub mod scheduler;

/// Map archive files
pub mod storage;

/// Elevation stream subscriber
pub mod stream_client;

/// Transforms between frames
pub mod tf;

/// Request server
pub mod trav_server;
