//! # Footprint
//!
//! Robot footprint shapes and finding the map cells they cover.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use comms_if::eqpt::trav::{FootprintPath, PathPose};
use nalgebra::{Rotation2, Vector2};

use super::{params::FootprintParams, EngineError};
use crate::grid_map::{GridMap, GridMapError};

// -----------------------------------------------------------------------------------------------
// ENUMS
// -----------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Footprint {
    /// Circle of the given radius centred on the pose
    Circle(f64),

    /// Polygon in the robot frame, rotated by the pose's yaw
    Polygon(Vec<Vector2<f64>>),
}

// -----------------------------------------------------------------------------------------------
// IMPLS
// -----------------------------------------------------------------------------------------------

impl Footprint {
    fn new(polygon: Vec<Vector2<f64>>, radius: f64) -> Result<Self, EngineError> {
        if polygon.is_empty() {
            if !(radius > 0.0 && radius.is_finite()) {
                return Err(EngineError::InvalidPath(format!(
                    "footprint radius must be positive, got {}",
                    radius
                )));
            }
            Ok(Self::Circle(radius))
        } else if polygon.iter().any(|v| !(v.x.is_finite() && v.y.is_finite())) {
            Err(EngineError::InvalidPath(
                "footprint polygon vertices must be finite".into(),
            ))
        } else if polygon.len() < 3 {
            Err(EngineError::InvalidPath(format!(
                "footprint polygon needs at least 3 vertices, got {}",
                polygon.len()
            )))
        } else {
            Ok(Self::Polygon(polygon))
        }
    }

    /// The footprint a path is checked with.
    pub fn from_path(path: &FootprintPath) -> Result<Self, EngineError> {
        Self::new(
            path.footprint
                .iter()
                .map(|&(x, y)| Vector2::new(x, y))
                .collect(),
            path.radius,
        )
    }

    /// The robot's configured footprint.
    pub fn from_params(params: &FootprintParams) -> Result<Self, EngineError> {
        Self::new(
            params
                .polygon_m
                .iter()
                .map(|&[x, y]| Vector2::new(x, y))
                .collect(),
            params.radius_m,
        )
    }

    /// Distance from the pose to the furthest point of the footprint.
    pub(crate) fn bounding_radius(&self) -> f64 {
        match self {
            Self::Circle(r) => *r,
            Self::Polygon(vertices) => vertices.iter().map(|v| v.norm()).fold(0.0, f64::max),
        }
    }

    /// Check if `point` is under the footprint when the robot is at `pose`.
    fn contains(&self, pose: &PathPose, point: &Vector2<f64>) -> bool {
        let offset = point - Vector2::new(pose.x, pose.y);

        match self {
            Self::Circle(r) => offset.norm() <= *r,
            Self::Polygon(vertices) => {
                // Bring the point into the robot frame and ray cast along +x
                let local = Rotation2::new(-pose.yaw) * offset;
                let mut inside = false;
                let mut j = vertices.len() - 1;

                for i in 0..vertices.len() {
                    let (a, b) = (vertices[i], vertices[j]);
                    if (a.y > local.y) != (b.y > local.y)
                        && local.x < (b.x - a.x) * (local.y - a.y) / (b.y - a.y) + a.x
                    {
                        inside = !inside;
                    }
                    j = i;
                }

                inside
            }
        }
    }

    /// All cells whose centres are under the footprint at the given pose.
    ///
    /// If the footprint is too small to cover any cell centre the cell containing the pose is
    /// returned. Poses outside the map give [`GridMapError::OutsideMap`].
    pub fn cells(&self, map: &GridMap, pose: &PathPose) -> Result<Vec<(usize, usize)>, GridMapError> {
        let centre = map.position_to_cell(&Vector2::new(pose.x, pose.y))?;
        let (nx, ny) = map.num_cells();
        let span = ((self.bounding_radius() / map.resolution()).ceil() as usize)
            .saturating_add(1)
            .min(nx.max(ny));

        let mut cells = Vec::new();
        for i in centre.0.saturating_sub(span)..centre.0.saturating_add(span + 1).min(nx) {
            for j in centre.1.saturating_sub(span)..centre.1.saturating_add(span + 1).min(ny) {
                if self.contains(pose, &map.cell_position((i, j))?) {
                    cells.push((i, j));
                }
            }
        }

        if cells.is_empty() {
            cells.push(centre);
        }

        Ok(cells)
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn map() -> GridMap {
        GridMap::new("map", 0.1, Vector2::new(2.0, 2.0), Vector2::zeros()).unwrap()
    }

    #[test]
    fn test_circle_cells() {
        let map = map();
        let fp = Footprint::Circle(0.2);

        let cells = fp.cells(&map, &PathPose::default()).unwrap();

        // Centres at +-0.05 and +-0.15 on each axis, minus the 4 corners at 0.212 m
        assert_eq!(cells.len(), 12);

        assert_eq!(
            fp.cells(&map, &PathPose { x: 3.0, y: 0.0, yaw: 0.0 }),
            Err(GridMapError::OutsideMap)
        );
    }

    #[test]
    fn test_polygon_rotates_with_yaw() {
        let map = map();

        // Long thin robot, 0.5 m along its x axis
        let fp = Footprint::Polygon(vec![
            Vector2::new(0.25, 0.05),
            Vector2::new(-0.25, 0.05),
            Vector2::new(-0.25, -0.05),
            Vector2::new(0.25, -0.05),
        ]);

        let along_x = fp
            .cells(&map, &PathPose { x: 0.05, y: 0.05, yaw: 0.0 })
            .unwrap();
        let along_y = fp
            .cells(
                &map,
                &PathPose {
                    x: 0.05,
                    y: 0.05,
                    yaw: std::f64::consts::FRAC_PI_2,
                },
            )
            .unwrap();

        assert_eq!(along_x.len(), 5);
        assert_eq!(along_y.len(), 5);
        assert!(along_x.iter().all(|c| c.1 == along_x[0].1));
        assert!(along_y.iter().all(|c| c.0 == along_y[0].0));
    }

    #[test]
    fn test_tiny_footprint_uses_centre_cell() {
        let map = map();
        let fp = Footprint::Circle(0.01);

        let cells = fp
            .cells(&map, &PathPose { x: 0.0, y: 0.0, yaw: 0.0 })
            .unwrap();
        assert_eq!(cells.len(), 1);
    }

    #[test]
    fn test_invalid_footprints() {
        let mut path = FootprintPath {
            poses: vec![PathPose::default()],
            radius: 0.0,
            footprint: vec![],
            conservative: true,
        };
        assert!(matches!(
            Footprint::from_path(&path),
            Err(EngineError::InvalidPath(_))
        ));

        path.footprint = vec![(0.1, 0.1), (-0.1, 0.1)];
        assert!(matches!(
            Footprint::from_path(&path),
            Err(EngineError::InvalidPath(_))
        ));

        path.footprint = vec![(0.1, 0.1), (-0.1, f64::NAN), (0.0, -0.1)];
        assert!(matches!(
            Footprint::from_path(&path),
            Err(EngineError::InvalidPath(_))
        ));

        path.footprint = vec![];
        path.radius = f64::INFINITY;
        assert!(matches!(
            Footprint::from_path(&path),
            Err(EngineError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_huge_footprint_covers_map() {
        let map = map();
        let fp = Footprint::Circle(1e300);

        let cells = fp.cells(&map, &PathPose::default()).unwrap();
        assert_eq!(cells.len(), 20 * 20);
    }
}
