//! # Traversability Node
//!
//! Owns the engine, the orchestrator and the query surface, and exposes every operation of the
//! node behind a single [`TravNode::handle`] dispatch for remote requests.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{Arc, Mutex};

use comms_if::eqpt::{
    elevation::ElevationImage,
    grid_map::{GridMapInfo, GridMapMsg, SubmapRequest},
    trav::{FootprintPath, TravCmd, TravRep, TravResult, TravServerError},
};
use log::{debug, info, warn};

use crate::{
    acq::AcqMode,
    cancel::CancelToken,
    engine::{EngineHandle, TravEngine},
    error::TravError,
    grid_map::GridMap,
    orchestrator::Orchestrator,
    params::TravExecParams,
    provider::MapProvider,
    query::QuerySurface,
    reload::ConfigService,
    scheduler::Scheduler,
    storage::MapStore,
    tf::TransformSource,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct TravNode {
    engine: Arc<EngineHandle>,

    orchestrator: Arc<Orchestrator>,

    query: QuerySurface,

    store: MapStore,

    config: Box<dyn ConfigService>,

    cancel: CancelToken,

    update_rate_hz: f64,

    scheduler: Mutex<Option<Scheduler>>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TravNode {
    pub fn new(
        params: &TravExecParams,
        engine: Box<dyn TravEngine>,
        provider: Box<dyn MapProvider>,
        tf: Arc<dyn TransformSource>,
        config: Box<dyn ConfigService>,
        store: MapStore,
    ) -> Self {
        let cancel = CancelToken::new();
        let engine = Arc::new(EngineHandle::new(engine));

        let orchestrator = Arc::new(Orchestrator::new(
            params,
            provider,
            engine.clone(),
            tf,
            cancel.clone(),
        ));

        let periodic = util::time::rate_to_period(params.min_update_rate_hz).is_some();
        let query = QuerySurface::new(
            engine.clone(),
            orchestrator.clone(),
            periodic,
            util::time::secs_to_duration(params.ready_timeout_s),
            params.footprint_yaw_rad,
        );

        Self {
            engine,
            orchestrator,
            query,
            store,
            config,
            cancel,
            update_rate_hz: params.min_update_rate_hz,
            scheduler: Mutex::new(None),
        }
    }

    /// Token cancelled when the node shuts down.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn mode(&self) -> Result<AcqMode, TravError> {
        self.orchestrator.mode()
    }

    /// Start periodic updates at the configured rate, if it's non-zero.
    pub fn start_scheduler(&self) -> Result<(), TravError> {
        let mut scheduler = self.scheduler.lock()?;

        if scheduler.is_some() {
            return Ok(());
        }

        let orchestrator = self.orchestrator.clone();
        *scheduler = Some(Scheduler::start(
            util::time::rate_to_period(self.update_rate_hz),
            self.cancel.clone(),
            move || orchestrator.trigger_update(),
        ));

        Ok(())
    }

    /// Stop the scheduler and wake up anything blocked on the node.
    ///
    /// Operations in progress return [`TravError::Cancelled`] where they were waiting.
    pub fn shutdown(&self) {
        info!("Shutting down the traversability node");

        self.cancel.cancel();
        self.engine.cancel();

        let scheduler = match self.scheduler.lock() {
            Ok(mut s) => s.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(mut s) = scheduler {
            s.join();
        }
    }

    // ---- OPERATIONS ----

    /// Load the stored elevation map and compute from it.
    pub fn load_elevation_map(&self) -> Result<(), TravError> {
        let map = self.store.load_elevation().map_err(TravError::StorageFailed)?;

        self.orchestrator.load_elevation(map)
    }

    /// Run one update cycle now.
    pub fn update_now(&self) -> Result<GridMapInfo, TravError> {
        self.orchestrator.trigger_update()?;

        Ok(self.engine.traversability_map()?.info())
    }

    pub fn map_info(&self) -> Result<GridMapInfo, TravError> {
        self.query.map_info()
    }

    pub fn get_submap(&self, request: &SubmapRequest) -> Result<GridMap, TravError> {
        self.query.get_submap(request)
    }

    pub fn check_footprint_paths(
        &self,
        paths: &[FootprintPath],
    ) -> Result<Vec<TravResult>, TravError> {
        self.query.check_footprint_paths(paths)
    }

    pub fn compute_footprint(&self) -> Result<(), TravError> {
        self.query.compute_footprint()
    }

    /// Reload the engine's filter configuration.
    pub fn reload_configuration(&self) -> Result<(), TravError> {
        let mut engine = self.engine.lock()?;

        self.config
            .reload(&mut **engine)
            .map_err(TravError::ReloadFailed)
    }

    /// Save the current traversability map to storage.
    pub fn save_to_storage(&self) -> Result<(), TravError> {
        let map = self.engine.traversability_map()?;

        self.store.save(&map).map_err(TravError::StorageFailed)
    }

    /// Merge a streamed elevation frame and compute from the result.
    pub fn on_stream_frame(&self, image: &ElevationImage) -> Result<(), TravError> {
        self.orchestrator.on_stream_frame(image)
    }

    /// Execute a remote command, converting the outcome into a reply.
    pub fn handle(&self, cmd: TravCmd) -> TravRep {
        debug!("Handling {:?}", cmd);

        let result = match cmd {
            TravCmd::LoadElevationMap => self.load_elevation_map().map(|_| TravRep::Ok),
            TravCmd::UpdateTraversability => self.update_now().map(TravRep::MapInfo),
            TravCmd::GetMapInfo => self.map_info().map(TravRep::MapInfo),
            TravCmd::GetTraversability(request) => self
                .get_submap(&request)
                .map(|m| TravRep::Map(GridMapMsg::from(&m))),
            TravCmd::CheckFootprintPath(paths) => self
                .check_footprint_paths(&paths)
                .map(TravRep::PathResults),
            TravCmd::TraversabilityFootprint => self.compute_footprint().map(|_| TravRep::Ok),
            TravCmd::UpdateParameters => self.reload_configuration().map(|_| TravRep::Ok),
            TravCmd::SaveToStorage => self.save_to_storage().map(|_| TravRep::Ok),
        };

        match result {
            Ok(rep) => rep,
            Err(e) => {
                warn!("Request failed: {}", e);
                TravRep::Error(TravServerError::from(&e))
            }
        }
    }
}

impl Drop for TravNode {
    fn drop(&mut self) {
        if !self.cancel.is_cancelled() {
            self.shutdown();
        }
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
        engine::{params::test::test_engine_params, test::MockEngine, FilterEngine},
        orchestrator::test::{provided_map, MockProvider},
        params::test::test_params,
        reload::ReloadError,
        tf::TransformBuffer,
    };
    use comms_if::eqpt::trav::{PathPose, TravErrorKind};
    use std::{fs, path::PathBuf, time::Duration};

    struct MockConfig;

    impl ConfigService for MockConfig {
        fn reload(&self, engine: &mut dyn TravEngine) -> Result<(), ReloadError> {
            engine.reload_filters().map_err(ReloadError::EngineError)
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("trav_node_{}_{}", name, std::process::id()));
        fs::remove_dir_all(&dir).ok();
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn node_with(
        params: &TravExecParams,
        engine: Box<dyn TravEngine>,
        provider: MockProvider,
        dir: &PathBuf,
    ) -> TravNode {
        TravNode::new(
            params,
            engine,
            Box::new(provider),
            Arc::new(TransformBuffer::new(&params.static_transforms, 1.0)),
            Box::new(MockConfig),
            MapStore::new(&params.storage, dir),
        )
    }

    fn error_kind(rep: TravRep) -> TravErrorKind {
        match rep {
            TravRep::Error(e) => e.kind,
            r => panic!("Expected an error, got {:?}", r),
        }
    }

    #[test]
    fn test_map_info_on_demand() {
        let dir = temp_dir("info");
        let node = node_with(
            &test_params(),
            Box::new(MockEngine::new("map")),
            MockProvider::new(Some(provided_map(&REQUIRED_LAYERS))),
            &dir,
        );

        match node.handle(TravCmd::GetMapInfo) {
            TravRep::MapInfo(info) => {
                assert_eq!(info.length_x, 5.0);
                assert_eq!(info.length_y, 5.0);
                assert_eq!(info.resolution, 0.1);
                assert_eq!(info.frame_id, "map");
            }
            r => panic!("Unexpected reply {:?}", r),
        }

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_push_then_unreachable_provider() {
        let dir = temp_dir("push");
        let provider = MockProvider::new(None);
        let waits = provider.waits.clone();
        let node = node_with(
            &test_params(),
            Box::new(MockEngine::new("map")),
            provider,
            &dir,
        );

        node.on_stream_frame(&frame(40, 40, 0)).unwrap();
        assert_eq!(node.mode().unwrap(), AcqMode::Push);

        assert!(matches!(
            node.handle(TravCmd::UpdateTraversability),
            TravRep::MapInfo(_)
        ));
        assert_eq!(waits.load(std::sync::atomic::Ordering::SeqCst), 0);

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_save_requires_map() {
        let dir = temp_dir("save");
        let node = node_with(
            &test_params(),
            Box::new(MockEngine::new("map")),
            MockProvider::new(None),
            &dir,
        );

        assert_eq!(
            error_kind(node.handle(TravCmd::SaveToStorage)),
            TravErrorKind::NotReady
        );
        assert!(!dir.join("traversability_map.json").exists());

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_load_compute_save() {
        let dir = temp_dir("load");
        let params = test_params();

        // Stored map without an upper bound layer
        let mut stored = provided_map(&["elevation", "lower_bound"]);
        stored.set_frame_id("odom");
        let mut archive = std::collections::HashMap::new();
        archive.insert(params.storage.topic.clone(), GridMapMsg::from(&stored));
        fs::write(
            dir.join(&params.storage.load_path),
            serde_json::to_string(&archive).unwrap(),
        )
        .unwrap();

        let engine = FilterEngine::new(test_engine_params().into_shared(), "map").unwrap();
        let node = node_with(&params, Box::new(engine), MockProvider::new(None), &dir);

        assert!(matches!(
            node.handle(TravCmd::LoadElevationMap),
            TravRep::Ok
        ));

        let map = node.engine.traversability_map().unwrap();
        assert_eq!(map.frame_id(), "odom");
        assert!(map.exists("traversability"));
        assert_eq!(
            node.orchestrator
                .last_elevation()
                .unwrap()
                .unwrap()
                .get("upper_bound", (0, 0))
                .unwrap(),
            0.0
        );

        assert!(matches!(node.handle(TravCmd::SaveToStorage), TravRep::Ok));
        assert!(dir.join(&params.storage.save_path).exists());

        // Flat ground is safe to cross
        let path = FootprintPath {
            poses: vec![
                PathPose {
                    x: -1.0,
                    y: 0.0,
                    yaw: 0.0,
                },
                PathPose {
                    x: 1.0,
                    y: 0.0,
                    yaw: 0.0,
                },
            ],
            radius: 0.2,
            footprint: Vec::new(),
            conservative: true,
        };
        match node.handle(TravCmd::CheckFootprintPath(vec![path.clone(), path])) {
            TravRep::PathResults(results) => {
                assert_eq!(results.len(), 2);
                assert!(results.iter().all(|r| r.is_safe));
            }
            r => panic!("Unexpected reply {:?}", r),
        }

        assert!(matches!(node.handle(TravCmd::UpdateParameters), TravRep::Ok));
        assert!(matches!(
            node.handle(TravCmd::TraversabilityFootprint),
            TravRep::Ok
        ));

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_missing_storage() {
        let dir = temp_dir("missing");
        let node = node_with(
            &test_params(),
            Box::new(MockEngine::new("map")),
            MockProvider::new(None),
            &dir,
        );

        assert_eq!(
            error_kind(node.handle(TravCmd::LoadElevationMap)),
            TravErrorKind::StorageFailed
        );
        assert_eq!(
            error_kind(node.handle(TravCmd::CheckFootprintPath(Vec::new()))),
            TravErrorKind::InvalidInput
        );

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_shutdown_stops_scheduler() {
        let dir = temp_dir("shutdown");
        let mut params = test_params();
        params.min_update_rate_hz = 100.0;

        let mock = MockEngine::new("map");
        let computes = mock.computes.clone();
        let node = node_with(
            &params,
            Box::new(mock),
            MockProvider::new(Some(provided_map(&REQUIRED_LAYERS))),
            &dir,
        );

        node.start_scheduler().unwrap();
        std::thread::sleep(Duration::from_millis(100));
        node.shutdown();

        let stopped_at = computes.load(std::sync::atomic::Ordering::SeqCst);
        assert!(stopped_at >= 1);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(
            computes.load(std::sync::atomic::Ordering::SeqCst),
            stopped_at
        );

        // Waits after shutdown return straight away
        assert_eq!(
            error_kind(node.handle(TravCmd::GetMapInfo)),
            TravErrorKind::Cancelled
        );

        fs::remove_dir_all(dir).ok();
    }
}
