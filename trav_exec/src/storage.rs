//! # Map Storage
//!
//! Grid maps are stored in JSON archive files, an object mapping topic names onto serialised
//! maps.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    collections::HashMap,
    convert::TryFrom,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use comms_if::eqpt::grid_map::GridMapMsg;
use log::{debug, info, warn};

use crate::{
    acq::REQUIRED_LAYERS,
    grid_map::{GridMap, GridMapError},
    params::StorageParams,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Archive files the elevation map is loaded from and the traversability map is saved to.
#[derive(Debug, Clone)]
pub struct MapStore {
    load_path: PathBuf,

    save_path: PathBuf,

    topic: String,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Couldn't access {0:?}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("Couldn't parse the archive {0:?}: {1}")]
    ParseError(PathBuf, serde_json::Error),

    #[error("Couldn't serialise the map: {0}")]
    SerializationError(serde_json::Error),

    #[error("The archive {0:?} has no map under the topic \"{1}\"")]
    TopicNotFound(PathBuf, String),

    #[error("The stored map is malformed: {0}")]
    MalformedMap(GridMapError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MapStore {
    /// Create a store from the parameters.
    ///
    /// Relative paths are resolved against `root`.
    pub fn new(params: &StorageParams, root: &Path) -> Self {
        Self {
            load_path: root.join(&params.load_path),
            save_path: root.join(&params.save_path),
            topic: params.topic.clone(),
        }
    }

    /// Load the elevation map.
    ///
    /// Any missing required layers are added and filled with zeros, and the map is stamped with
    /// the current time.
    pub fn load_elevation(&self) -> Result<GridMap, StorageError> {
        let archive_str = fs::read_to_string(&self.load_path)
            .map_err(|e| StorageError::Io(self.load_path.clone(), e))?;

        let mut archive: HashMap<String, GridMapMsg> = serde_json::from_str(&archive_str)
            .map_err(|e| StorageError::ParseError(self.load_path.clone(), e))?;

        let msg = archive
            .remove(&self.topic)
            .ok_or_else(|| StorageError::TopicNotFound(self.load_path.clone(), self.topic.clone()))?;

        let mut map = GridMap::try_from(msg).map_err(StorageError::MalformedMap)?;

        for layer in REQUIRED_LAYERS.iter() {
            if !map.exists(layer) {
                warn!("Stored map has no \"{}\" layer, filling it with zeros", layer);
                map.add_layer(layer, 0.0);
            }
        }

        map.set_timestamp(Utc::now());

        info!("Loaded elevation map from {:?}", self.load_path);
        debug!(
            "Loaded map: frame \"{}\", resolution {} m, length {} x {} m, position ({}, {}), {} x {} cells, layers {:?}",
            map.frame_id(),
            map.resolution(),
            map.length().x,
            map.length().y,
            map.position().x,
            map.position().y,
            map.num_cells().0,
            map.num_cells().1,
            map.layers()
        );

        Ok(map)
    }

    /// Save a map to the save archive.
    ///
    /// The archive is written to a temporary file which then replaces the target, so the target
    /// either holds the whole new archive or is left as it was.
    pub fn save(&self, map: &GridMap) -> Result<(), StorageError> {
        let mut archive = HashMap::new();
        archive.insert(self.topic.clone(), GridMapMsg::from(map));

        let archive_str =
            serde_json::to_string(&archive).map_err(StorageError::SerializationError)?;

        let mut tmp_path = self.save_path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let write = |path: &Path| -> std::io::Result<()> {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }
            let mut file = fs::File::create(path)?;
            file.write_all(archive_str.as_bytes())?;
            file.sync_all()
        };

        if let Err(e) = write(&tmp_path) {
            fs::remove_file(&tmp_path).ok();
            return Err(StorageError::Io(tmp_path, e));
        }

        fs::rename(&tmp_path, &self.save_path).map_err(|e| {
            fs::remove_file(&tmp_path).ok();
            StorageError::Io(self.save_path.clone(), e)
        })?;

        info!("Saved traversability map to {:?}", self.save_path);

        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
