//! # Traversability Errors
//!
//! [`TravError`] is returned by every public operation of the node. Each variant maps onto a
//! serialisable [`TravErrorKind`] which is sent back to remote callers.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::PoisonError;

use comms_if::eqpt::trav::{TravErrorKind, TravServerError};

use crate::{
    engine::EngineError, grid_map::GridMapError, provider::ProviderError, reload::ReloadError,
    storage::StorageError, tf::TfError,
};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TravError {
    #[error("The map provider is unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Couldn't resolve the submap position: {0}")]
    TransformUnavailable(TfError),

    #[error("Elevation map acquisition failed: {0}")]
    AcquisitionFailed(ProviderError),

    #[error("Traversability computation failed: {0}")]
    ComputationFailed(EngineError),

    #[error("Query is outside the traversability map: {0}")]
    QueryOutOfBounds(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage operation failed: {0}")]
    StorageFailed(StorageError),

    #[error("The traversability map is not ready")]
    NotReady,

    #[error("The operation was cancelled by shutdown")]
    Cancelled,

    #[error("Couldn't reload the engine configuration: {0}")]
    ReloadFailed(ReloadError),

    #[error("A synchronisation primitive is poisoned")]
    PoisonError,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TravError {
    /// Category of this error as sent to remote callers.
    pub fn kind(&self) -> TravErrorKind {
        match self {
            Self::ProviderUnavailable(_) => TravErrorKind::ProviderUnavailable,
            Self::TransformUnavailable(_) => TravErrorKind::TransformUnavailable,
            Self::AcquisitionFailed(_) => TravErrorKind::AcquisitionFailed,
            Self::ComputationFailed(_) => TravErrorKind::ComputationFailed,
            Self::QueryOutOfBounds(_) => TravErrorKind::QueryOutOfBounds,
            Self::InvalidInput(_) => TravErrorKind::InvalidInput,
            Self::StorageFailed(_) => TravErrorKind::StorageFailed,
            Self::NotReady => TravErrorKind::NotReady,
            Self::Cancelled => TravErrorKind::Cancelled,
            Self::ReloadFailed(_) => TravErrorKind::ReloadFailed,
            Self::PoisonError => TravErrorKind::Internal,
        }
    }

    /// Map an error raised while querying the engine's current map.
    ///
    /// Geometry problems are the caller's fault, anything else means the engine couldn't answer.
    pub fn from_query(e: EngineError) -> Self {
        match e {
            EngineError::NotReady => Self::NotReady,
            EngineError::InvalidPath(m) => Self::InvalidInput(m),
            EngineError::GridMapError(GridMapError::UnknownLayer(l)) => {
                Self::InvalidInput(format!("unknown layer \"{}\"", l))
            }
            EngineError::GridMapError(e @ GridMapError::InvalidGeometry(_)) => {
                Self::InvalidInput(e.to_string())
            }
            EngineError::GridMapError(e @ GridMapError::OutsideMap)
            | EngineError::GridMapError(e @ GridMapError::SubmapOutOfBounds) => {
                Self::QueryOutOfBounds(e.to_string())
            }
            EngineError::PoisonError => Self::PoisonError,
            e => Self::ComputationFailed(e),
        }
    }
}

impl From<&TravError> for TravServerError {
    fn from(e: &TravError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl<G> From<PoisonError<G>> for TravError {
    fn from(_: PoisonError<G>) -> Self {
        Self::PoisonError
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_query_error_mapping() {
        assert_eq!(
            TravError::from_query(EngineError::NotReady).kind(),
            TravErrorKind::NotReady
        );
        assert_eq!(
            TravError::from_query(EngineError::GridMapError(GridMapError::SubmapOutOfBounds))
                .kind(),
            TravErrorKind::QueryOutOfBounds
        );
        assert_eq!(
            TravError::from_query(EngineError::GridMapError(GridMapError::UnknownLayer(
                "slope".into()
            )))
            .kind(),
            TravErrorKind::InvalidInput
        );
        assert_eq!(
            TravError::from_query(EngineError::NoInput).kind(),
            TravErrorKind::ComputationFailed
        );
    }

    #[test]
    fn test_server_error() {
        let err = TravServerError::from(&TravError::NotReady);

        assert_eq!(err.kind, TravErrorKind::NotReady);
        assert_eq!(err.message, "The traversability map is not ready");
    }
}
