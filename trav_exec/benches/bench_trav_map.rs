//! # Traversability Map Benchmark

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use comms_if::eqpt::trav::{FootprintPath, PathPose};
use nalgebra::Vector2;
use ndarray::Array2;
use trav_lib::{
    engine::{params::EngineParams, FilterEngine, TravEngine},
    grid_map::GridMap,
};

const FILTERS: &str = r#"
    [slope]
    critical_slope_rad = 0.6
    weight = 0.4

    [step]
    critical_step_m = 0.12
    window_radius_m = 0.1
    weight = 0.4

    [roughness]
    critical_roughness_m = 0.05
    window_radius_m = 0.1
    weight = 0.2
"#;

const FOOTPRINT: &str = r#"
    polygon_m = [[0.3, 0.2], [-0.3, 0.2], [-0.3, -0.2], [0.3, -0.2]]
    radius_m = 0.25
    traversability_default = 0.5
"#;

fn trav_map_benchmark(c: &mut Criterion) {
    // ---- Build a 10 x 10 m rolling elevation map ----

    let mut elevation_map =
        GridMap::new("map", 0.05, Vector2::new(10.0, 10.0), Vector2::zeros()).unwrap();
    let num_cells = elevation_map.num_cells();
    elevation_map
        .add_layer_data(
            "elevation",
            Array2::from_shape_fn(num_cells, |(x, y)| {
                0.2 * (x as f64 * 0.05).sin() * (y as f64 * 0.07).cos()
            }),
        )
        .unwrap();
    elevation_map.add_layer("upper_bound", 0.0);
    elevation_map.add_layer("lower_bound", 0.0);
    let elevation_map = Arc::new(elevation_map);

    let params = EngineParams {
        filters: util::params::from_str(FILTERS).unwrap(),
        footprint: util::params::from_str(FOOTPRINT).unwrap(),
    };
    let mut engine = FilterEngine::new(params.into_shared(), "map").unwrap();
    engine.set_elevation_input(elevation_map.clone()).unwrap();

    c.bench_function("GridMap::submap", |b| {
        b.iter(|| {
            elevation_map
                .submap(&Vector2::new(1.0, -2.0), &Vector2::new(4.0, 4.0))
                .unwrap()
        })
    });

    c.bench_function("FilterEngine::compute", |b| {
        b.iter(|| engine.compute().unwrap())
    });

    let path = FootprintPath {
        poses: (0..50)
            .map(|i| PathPose {
                x: -4.0 + i as f64 * 0.16,
                y: 0.5,
                yaw: 0.3,
            })
            .collect(),
        radius: 0.25,
        footprint: vec![(0.3, 0.2), (-0.3, 0.2), (-0.3, -0.2), (0.3, -0.2)],
        conservative: true,
    };

    c.bench_function("FilterEngine::check_path", |b| {
        b.iter(|| engine.check_path(&path).unwrap())
    });
}

criterion_group!(benches, trav_map_benchmark);
criterion_main!(benches);
