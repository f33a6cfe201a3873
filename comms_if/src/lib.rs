//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the traversability software: the messages
//! exchanged with the submap provider, the elevation stream, and the traversability request
//! server, plus the network abstractions they are sent over.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Command and response definitions for equipment (map providers, sensor streams, servers)
pub mod eqpt;

/// Network module
pub mod net;
