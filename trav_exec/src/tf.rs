//! # Transform Buffer
//!
//! Provides rigid transforms between named reference frames. Transforms are either static,
//! configured from the node's parameter file, or stamped, inserted at runtime by whatever is
//! tracking the robot. Stamped transforms older than the configured maximum age are considered
//! stale and aren't returned.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use chrono::{DateTime, Duration, Utc};
use log::trace;
use nalgebra::{Isometry3, Translation3, UnitQuaternion};
use serde::Deserialize;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Something that can transform points between reference frames.
pub trait TransformSource: Send + Sync {
    /// Get the transform taking points expressed in `source` into `target`.
    fn lookup(&self, target: &str, source: &str) -> Result<Isometry3<f64>, TfError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A static transform as written in the parameter file.
#[derive(Debug, Clone, Deserialize)]
pub struct StaticTransformParams {
    /// Frame the transform is expressed in
    pub parent: String,

    /// Frame being transformed
    pub child: String,

    /// Position of the child's origin in the parent frame
    pub translation_m: [f64; 3],

    /// Orientation of the child in the parent frame as roll, pitch, yaw
    #[serde(default)]
    pub rotation_rpy_rad: [f64; 3],
}

/// Stores static and stamped transforms keyed by `(parent, child)`.
pub struct TransformBuffer {
    static_tfs: HashMap<(String, String), Isometry3<f64>>,

    stamped_tfs: RwLock<HashMap<(String, String), StampedTransform>>,

    max_age: Duration,
}

#[derive(Debug, Clone, Copy)]
struct StampedTransform {
    transform: Isometry3<f64>,
    timestamp: DateTime<Utc>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum TfError {
    #[error("No transform from \"{source_frame}\" to \"{target_frame}\" is known")]
    Unknown {
        target_frame: String,
        source_frame: String,
    },

    #[error(
        "The transform from \"{source_frame}\" to \"{target_frame}\" is {age_s:.3} s old, \
        exceeding the maximum age"
    )]
    Stale {
        target_frame: String,
        source_frame: String,
        age_s: f64,
    },

    #[error("The transform buffer lock is poisoned")]
    PoisonError,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StaticTransformParams {
    pub fn isometry(&self) -> Isometry3<f64> {
        let [x, y, z] = self.translation_m;
        let [roll, pitch, yaw] = self.rotation_rpy_rad;

        Isometry3::from_parts(
            Translation3::new(x, y, z),
            UnitQuaternion::from_euler_angles(roll, pitch, yaw),
        )
    }
}

impl TransformBuffer {
    /// Create a new buffer with the given static transforms.
    ///
    /// Stamped transforms older than `max_age_s` are rejected by lookups.
    pub fn new(static_tfs: &[StaticTransformParams], max_age_s: f64) -> Self {
        Self {
            static_tfs: static_tfs
                .iter()
                .map(|t| ((t.parent.clone(), t.child.clone()), t.isometry()))
                .collect(),
            stamped_tfs: RwLock::new(HashMap::new()),
            max_age: Duration::from_std(util::time::secs_to_duration(max_age_s))
                .unwrap_or_else(|_| Duration::max_value()),
        }
    }

    /// Insert or replace a stamped transform from `child` into `parent`.
    pub fn insert(
        &self,
        parent: &str,
        child: &str,
        transform: Isometry3<f64>,
        timestamp: DateTime<Utc>,
    ) -> Result<(), TfError> {
        self.stamped_tfs.write()?.insert(
            (parent.to_string(), child.to_string()),
            StampedTransform {
                transform,
                timestamp,
            },
        );

        Ok(())
    }

    /// Find the transform stored directly for `(parent, child)`, checking its age.
    fn find(&self, parent: &str, child: &str) -> Result<Option<Isometry3<f64>>, TfError> {
        let key = (parent.to_string(), child.to_string());

        if let Some(tf) = self.static_tfs.get(&key) {
            return Ok(Some(*tf));
        }

        let stamped = match self.stamped_tfs.read()?.get(&key) {
            Some(s) => *s,
            None => return Ok(None),
        };

        let age = Utc::now() - stamped.timestamp;
        if age > self.max_age {
            return Err(TfError::Stale {
                target_frame: parent.to_string(),
                source_frame: child.to_string(),
                age_s: util::time::duration_to_seconds(age).unwrap_or(f64::INFINITY),
            });
        }

        Ok(Some(stamped.transform))
    }
}

impl TransformSource for TransformBuffer {
    fn lookup(&self, target: &str, source: &str) -> Result<Isometry3<f64>, TfError> {
        if target == source {
            return Ok(Isometry3::identity());
        }

        if let Some(tf) = self.find(target, source)? {
            trace!("Direct transform {} -> {}", source, target);
            return Ok(tf);
        }

        if let Some(tf) = self.find(source, target)? {
            trace!("Inverse transform {} -> {}", source, target);
            return Ok(tf.inverse());
        }

        Err(TfError::Unknown {
            target_frame: target.to_string(),
            source_frame: source.to_string(),
        })
    }
}

impl<G> From<PoisonError<G>> for TfError {
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
    use nalgebra::Point3;

    fn buffer() -> TransformBuffer {
        TransformBuffer::new(
            &[StaticTransformParams {
                parent: "map".into(),
                child: "base_link".into(),
                translation_m: [1.0, 2.0, 0.0],
                rotation_rpy_rad: [0.0, 0.0, std::f64::consts::FRAC_PI_2],
            }],
            0.5,
        )
    }

    #[test]
    fn test_lookups() {
        let tfs = buffer();

        assert_eq!(tfs.lookup("odom", "odom").unwrap(), Isometry3::identity());

        // Point 1 m in front of the robot, which is facing +y in the map
        let p = tfs.lookup("map", "base_link").unwrap() * Point3::new(1.0, 0.0, 0.0);
        assert!((p - Point3::new(1.0, 3.0, 0.0)).norm() < 1e-9);

        let back = tfs.lookup("base_link", "map").unwrap() * p;
        assert!((back - Point3::new(1.0, 0.0, 0.0)).norm() < 1e-9);

        assert!(matches!(
            tfs.lookup("map", "camera"),
            Err(TfError::Unknown { .. })
        ));
    }

    #[test]
    fn test_stamped_staleness() {
        let tfs = buffer();

        tfs.insert(
            "odom",
            "base_link",
            Isometry3::translation(0.5, 0.0, 0.0),
            Utc::now(),
        )
        .unwrap();
        assert!(tfs.lookup("odom", "base_link").is_ok());

        tfs.insert(
            "odom",
            "base_link",
            Isometry3::translation(0.5, 0.0, 0.0),
            Utc::now() - Duration::seconds(2),
        )
        .unwrap();
        assert!(matches!(
            tfs.lookup("odom", "base_link"),
            Err(TfError::Stale { .. })
        ));
        assert!(matches!(
            tfs.lookup("base_link", "odom"),
            Err(TfError::Stale { .. })
        ));
    }
}
