//! # Query Surface
//!
//! Answers requests against whatever traversability map the engine currently holds.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{sync::Arc, time::Duration};

use comms_if::eqpt::{
    grid_map::{GridMapInfo, SubmapRequest},
    trav::{FootprintPath, TravResult},
};
use log::debug;
use nalgebra::Vector2;

use crate::{
    engine::{EngineError, EngineHandle},
    error::TravError,
    grid_map::GridMap,
    orchestrator::Orchestrator,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct QuerySurface {
    engine: Arc<EngineHandle>,

    orchestrator: Arc<Orchestrator>,

    /// If true the map is updated by the scheduler, otherwise map info requests update it
    periodic: bool,

    ready_timeout: Duration,

    footprint_yaw: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl QuerySurface {
    pub fn new(
        engine: Arc<EngineHandle>,
        orchestrator: Arc<Orchestrator>,
        periodic: bool,
        ready_timeout: Duration,
        footprint_yaw: f64,
    ) -> Self {
        Self {
            engine,
            orchestrator,
            periodic,
            ready_timeout,
            footprint_yaw,
        }
    }

    /// Geometry of the current traversability map.
    ///
    /// Without periodic updates an update is run first. Waits up to the ready timeout for the
    /// engine to hold a map.
    pub fn map_info(&self) -> Result<GridMapInfo, TravError> {
        if !self.periodic {
            self.orchestrator.trigger_update()?;
        }

        self.engine.wait_ready(self.ready_timeout)?;

        Ok(self.engine.traversability_map()?.info())
    }

    /// Extract a region of the current traversability map.
    ///
    /// An empty layer list returns every layer.
    pub fn get_submap(&self, request: &SubmapRequest) -> Result<GridMap, TravError> {
        let map = self.engine.traversability_map()?;

        let submap = map
            .submap(
                &Vector2::new(request.position.0, request.position.1),
                &Vector2::new(request.length.0, request.length.1),
            )
            .map_err(|e| TravError::from_query(EngineError::from(e)))?;

        let submap = match request.layers.is_empty() {
            true => submap,
            false => submap
                .with_layers(&request.layers)
                .map_err(|e| TravError::from_query(EngineError::from(e)))?,
        };

        debug!(
            "Extracted {} x {} cell submap with layers {:?}",
            submap.num_cells().0,
            submap.num_cells().1,
            submap.layers()
        );

        Ok(submap)
    }

    /// Check a batch of paths, returning one result per path in the same order.
    ///
    /// If any path can't be checked the whole batch fails.
    pub fn check_footprint_paths(
        &self,
        paths: &[FootprintPath],
    ) -> Result<Vec<TravResult>, TravError> {
        if paths.is_empty() {
            return Err(TravError::InvalidInput("no paths to check".into()));
        }

        // Every path is checked against the same map
        let engine = self.engine.lock()?;

        let results = paths
            .iter()
            .map(|p| engine.check_path(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(TravError::from_query)?;

        debug!(
            "Checked {} paths, {} safe",
            results.len(),
            results.iter().filter(|r| r.is_safe).count()
        );

        Ok(results)
    }

    /// Score the robot footprint at the configured yaw over the current map.
    pub fn compute_footprint(&self) -> Result<(), TravError> {
        self.engine
            .lock()?
            .score_footprint(self.footprint_yaw)
            .map_err(TravError::from_query)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        acq::{test::frame, REQUIRED_LAYERS},
        cancel::CancelToken,
        engine::test::MockEngine,
        orchestrator::test::{provided_map, MockProvider},
        params::test::test_params,
        tf::TransformBuffer,
    };
    use comms_if::eqpt::trav::{PathPose, TravErrorKind};

    fn surface(provider: MockProvider, engine: MockEngine, periodic: bool) -> QuerySurface {
        let params = test_params();
        let engine = Arc::new(EngineHandle::new(Box::new(engine)));
        let orch = Arc::new(Orchestrator::new(
            &params,
            Box::new(provider),
            engine.clone(),
            Arc::new(TransformBuffer::new(&params.static_transforms, 1.0)),
            CancelToken::new(),
        ));

        QuerySurface::new(engine, orch, periodic, Duration::from_millis(50), 0.0)
    }

    fn ready_surface() -> QuerySurface {
        let s = surface(
            MockProvider::new(Some(provided_map(&REQUIRED_LAYERS))),
            MockEngine::new("map"),
            false,
        );
        s.map_info().unwrap();
        s
    }

    fn path(num_poses: usize) -> FootprintPath {
        FootprintPath {
            poses: vec![PathPose::default(); num_poses],
            radius: 0.2,
            footprint: Vec::new(),
            conservative: true,
        }
    }

    #[test]
    fn test_map_info_triggers_update() {
        let s = surface(
            MockProvider::new(Some(provided_map(&REQUIRED_LAYERS))),
            MockEngine::new("map"),
            false,
        );

        let info = s.map_info().unwrap();
        assert_eq!(info.frame_id, "map");
        assert_eq!(info.resolution, 0.1);
        assert_eq!(info.length_x, 5.0);
        assert_eq!(info.length_y, 5.0);
        assert_eq!(info.orientation, (0.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn test_map_info_fails_with_update() {
        let s = surface(MockProvider::new(None), MockEngine::new("map"), false);

        assert_eq!(
            s.map_info().unwrap_err().kind(),
            TravErrorKind::ProviderUnavailable
        );
    }

    #[test]
    fn test_map_info_periodic_waits_for_ready() {
        let provider = MockProvider::new(Some(provided_map(&REQUIRED_LAYERS)));
        let requests = provider.requests.clone();
        let s = surface(provider, MockEngine::new("map"), true);

        assert!(matches!(s.map_info(), Err(TravError::NotReady)));
        assert!(requests.lock().unwrap().is_empty());

        s.orchestrator.trigger_update().unwrap();
        assert!(s.map_info().is_ok());
    }

    #[test]
    fn test_map_info_after_push() {
        let s = surface(MockProvider::new(None), MockEngine::new("map"), false);

        s.orchestrator.on_stream_frame(&frame(40, 40, 0)).unwrap();

        let info = s.map_info().unwrap();
        assert_eq!(info.resolution, 0.05);
        assert!((info.length_x - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_get_submap_layers() {
        let s = ready_surface();
        let full = s.engine.traversability_map().unwrap();

        let mut request = SubmapRequest {
            position: (0.5, -0.5),
            length: (1.0, 2.0),
            layers: Vec::new(),
        };

        let all = s.get_submap(&request).unwrap();
        assert_eq!(all.layers(), full.layers());
        assert_eq!(all.num_cells(), (10, 20));

        request.layers = vec!["traversability".into(), "elevation".into()];
        let some = s.get_submap(&request).unwrap();
        assert_eq!(some.layers(), &["traversability", "elevation"]);
        for x in 0..10 {
            for y in 0..20 {
                let pos = some.cell_position((x, y)).unwrap();
                assert_eq!(
                    some.get("traversability", (x, y)).unwrap(),
                    full.get_position("traversability", &pos).unwrap()
                );
            }
        }

        request.layers = vec!["slope".into()];
        assert_eq!(
            s.get_submap(&request).unwrap_err().kind(),
            TravErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_get_submap_errors() {
        let not_ready = surface(MockProvider::new(None), MockEngine::new("map"), true);
        let request = SubmapRequest {
            position: (0.0, 0.0),
            length: (1.0, 1.0),
            layers: Vec::new(),
        };
        assert!(matches!(
            not_ready.get_submap(&request),
            Err(TravError::NotReady)
        ));

        let s = ready_surface();
        let outside = SubmapRequest {
            position: (10.0, 0.0),
            ..request.clone()
        };
        assert_eq!(
            s.get_submap(&outside).unwrap_err().kind(),
            TravErrorKind::QueryOutOfBounds
        );

        // Overlapping by less than one cell
        let sliver = SubmapRequest {
            position: (3.0, 0.0),
            length: (1.02, 1.0),
            layers: Vec::new(),
        };
        assert_eq!(
            s.get_submap(&sliver).unwrap_err().kind(),
            TravErrorKind::QueryOutOfBounds
        );
    }

    #[test]
    fn test_check_paths_in_order() {
        let s = ready_surface();

        assert_eq!(
            s.check_footprint_paths(&[]).unwrap_err().kind(),
            TravErrorKind::InvalidInput
        );

        let results = s
            .check_footprint_paths(&[path(3), path(1), path(2)])
            .unwrap();
        let counts: Vec<f64> = results.iter().map(|r| r.traversability).collect();
        assert_eq!(counts, vec![3.0, 1.0, 2.0]);
    }

    #[test]
    fn test_check_paths_all_or_nothing() {
        let mut engine = MockEngine::new("map");
        engine.path_results = vec![
            Err("empty path".into()),
            Ok(TravResult {
                is_safe: false,
                traversability: 0.0,
                area: 0.1,
            }),
        ];
        let s = surface(
            MockProvider::new(Some(provided_map(&REQUIRED_LAYERS))),
            engine,
            false,
        );
        s.map_info().unwrap();

        assert_eq!(s.check_footprint_paths(&[path(1)]).unwrap()[0].area, 0.1);
        assert_eq!(
            s.check_footprint_paths(&[path(1), path(0), path(2)])
                .unwrap_err()
                .kind(),
            TravErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_compute_footprint() {
        let not_ready = surface(MockProvider::new(None), MockEngine::new("map"), true);
        assert!(matches!(
            not_ready.compute_footprint(),
            Err(TravError::NotReady)
        ));

        let s = ready_surface();
        s.compute_footprint().unwrap();
        assert!(s
            .engine
            .traversability_map()
            .unwrap()
            .exists("traversability_footprint"));
    }
}
