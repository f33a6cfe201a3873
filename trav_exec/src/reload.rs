//! # Configuration Reload
//!
//! Reconfigures the engine's filters while the node is running.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::PoisonError;

use log::{info, warn};
use util::params::LoadError;

use crate::engine::{
    params::{EngineParams, SharedEngineParams},
    EngineError, TravEngine,
};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Something that can reconfigure an engine.
pub trait ConfigService: Send + Sync {
    /// Reconfigure the engine. On failure the engine keeps its previous configuration.
    fn reload(&self, engine: &mut dyn TravEngine) -> Result<(), ReloadError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Reloads the engine parameters from their files.
pub struct FileConfigService {
    filters_file: String,

    footprint_file: String,

    params: SharedEngineParams,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error("Couldn't load the parameter files: {0}")]
    ParamLoadError(LoadError),

    #[error("The engine rejected the new parameters: {0}")]
    EngineError(EngineError),

    #[error("The shared parameter lock is poisoned")]
    PoisonError,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl FileConfigService {
    pub fn new(filters_file: &str, footprint_file: &str, params: SharedEngineParams) -> Self {
        Self {
            filters_file: filters_file.to_string(),
            footprint_file: footprint_file.to_string(),
            params,
        }
    }

    /// Make `new_params` the engine's parameters, putting the old ones back if the engine rejects
    /// them.
    fn apply(&self, new_params: EngineParams, engine: &mut dyn TravEngine) -> Result<(), ReloadError> {
        let old_params = std::mem::replace(&mut *self.params.write()?, new_params);

        match engine.reload_filters() {
            Ok(()) => {
                info!(
                    "Engine parameters reloaded from {} and {}",
                    self.filters_file, self.footprint_file
                );
                Ok(())
            }
            Err(e) => {
                warn!("Engine rejected the reloaded parameters, keeping the previous ones");
                *self.params.write()? = old_params;
                Err(ReloadError::EngineError(e))
            }
        }
    }
}

impl ConfigService for FileConfigService {
    fn reload(&self, engine: &mut dyn TravEngine) -> Result<(), ReloadError> {
        let new_params = EngineParams::load(&self.filters_file, &self.footprint_file)
            .map_err(ReloadError::ParamLoadError)?;

        self.apply(new_params, engine)
    }
}

impl<G> From<PoisonError<G>> for ReloadError {
    fn from(_: PoisonError<G>) -> Self {
        Self::PoisonError
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
