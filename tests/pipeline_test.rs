//! End-to-end tests over the public API: cube formats, statistics,
//! surfaces and the extraction/merging pipeline.

use ndarray::{Array2, Array3};
use seiscube::segy::{write_columnar, ColumnarSpec};
use seiscube::{
    merge_list, surfaces_from_mask, verify_merge, Axis, CompressionMethod, Cube, ExtractParams,
    GridGeometry, MergeParams, MergeStatus, ScaleMode, Surface,
};
use std::path::PathBuf;
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn synthetic_volume() -> Array3<f32> {
    Array3::from_shape_fn((16, 12, 50), |(i, x, h)| {
        ((i as f32) * 0.7 + (x as f32) * 1.3 + h as f32).sin() * 100.0
    })
}

fn write_columnar_cube(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("field.sgy");
    let spec = ColumnarSpec {
        ilines: (2000..2016).collect(),
        xlines: (3300..3312).collect(),
        sample_interval: 2.0,
        delay: 100,
    };
    write_columnar(&path, &synthetic_volume(), &spec).unwrap();
    path
}

#[test]
fn formats_agree_on_every_read() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let mut columnar = Cube::open(&write_columnar_cube(&dir)).unwrap();

    let container = dir.path().join("field.vol");
    columnar
        .convert_to_dense(&container, CompressionMethod::Zstd)
        .unwrap();
    let mut dense = Cube::open(&container).unwrap();

    assert_eq!(dense.shape(), columnar.shape());
    assert_eq!(dense.ilines(), columnar.ilines());
    assert_eq!(dense.delay(), columnar.delay());

    for axis in [Axis::Inline, Axis::Crossline, Axis::Depth] {
        let a = columnar.load_slice(4, axis, true).unwrap();
        let b = dense.load_slice(4, axis, true).unwrap();
        assert_eq!(*a, *b, "slice mismatch along {}", axis);
    }

    let a = columnar.load_subvolume(&[3..9, 2..8, 10..30]).unwrap();
    let b = dense.load_subvolume(&[3..9, 2..8, 10..30]).unwrap();
    assert_eq!(a, b);

    assert_eq!(
        columnar.load_trace(7, 5).unwrap(),
        dense.load_trace(7, 5).unwrap()
    );
}

#[test]
fn thin_subvolume_equals_slice() {
    let dir = TempDir::new().unwrap();
    let mut cube = Cube::open(&write_columnar_cube(&dir)).unwrap();
    let [i_len, x_len, depth] = cube.shape();

    let sub = cube.load_subvolume(&[0..i_len, 5..6, 0..depth]).unwrap();
    let slice = cube.load_slice(5, Axis::Crossline, true).unwrap();
    for i in 0..i_len {
        for h in 0..depth {
            assert_eq!(sub[[i, 0, h]], slice[[i, h]]);
        }
    }

    let sub = cube.load_subvolume(&[0..i_len, 0..x_len, 20..21]).unwrap();
    let slice = cube.load_slice(20, Axis::Depth, true).unwrap();
    for i in 0..i_len {
        for x in 0..x_len {
            assert_eq!(sub[[i, x, 0]], slice[[i, x]]);
        }
    }
}

#[test]
fn normalization_endpoints() {
    let dir = TempDir::new().unwrap();
    let mut cube = Cube::open(&write_columnar_cube(&dir)).unwrap();

    let crop = cube.to_array().unwrap();
    let scaled = cube.normalize(crop, ScaleMode::MinMax).unwrap();
    let mut lo = f32::INFINITY;
    let mut hi = f32::NEG_INFINITY;
    for &v in scaled.iter() {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    assert_eq!(lo, 0.0);
    assert_eq!(hi, 1.0);
}

#[test]
fn statistics_survive_conversion() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let mut columnar = Cube::open(&write_columnar_cube(&dir)).unwrap();
    let value_min = columnar.stats(true).unwrap().value_min;

    let container = dir.path().join("field.vol");
    columnar
        .convert_to_dense(&container, CompressionMethod::Zstd)
        .unwrap();

    let mut dense = Cube::open(&container).unwrap();
    let restored = dense.stats(true).unwrap();
    assert_eq!(restored.value_min, value_min);
    assert!(restored.spatial.is_some());
}

#[test]
fn surface_roundtrip_through_cube_grid() {
    let dir = TempDir::new().unwrap();
    let mut cube = Cube::open(&write_columnar_cube(&dir)).unwrap();
    let grid = cube.grid();
    assert_eq!(grid.iline_offset, 2000);
    assert_eq!(grid.xline_offset, 3300);

    // A dipping surface over part of the grid
    let mut points = Vec::new();
    for i in 2..14 {
        for x in 1..10 {
            points.push([i, x, 10 + (i + x) / 2]);
        }
    }
    let mut surface = Surface::from_points(grid, "dipping", points).unwrap();

    let path = dir.path().join("dipping.char");
    surface.dump(&path).unwrap();
    let mut loaded = Surface::from_file(&path, grid).unwrap();

    assert_eq!(loaded.len(), surface.len());
    assert_eq!(loaded.depth_range(), surface.depth_range());
    for i in 2..14 {
        for x in 1..10 {
            assert_eq!(loaded.depth_at(i, x), surface.depth_at(i, x));
        }
    }
}

#[test]
fn amplitudes_cut_along_a_surface() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ramp.sgy");

    // Amplitude equals the depth index, so window contents are predictable
    let data = Array3::from_shape_fn((8, 8, 50), |(_, _, h)| h as f32);
    let spec = ColumnarSpec {
        ilines: (0..8).collect(),
        xlines: (0..8).collect(),
        sample_interval: 2.0,
        delay: 0,
    };
    write_columnar(&path, &data, &spec).unwrap();
    let mut cube = Cube::open(&path).unwrap();

    // A flat 3x3 patch at depth 20 with one absent cell
    let points: Vec<[i32; 3]> = (1..4)
        .flat_map(|i| (1..4).map(move |x| [i, x, 20]))
        .filter(|p| (p[0], p[1]) != (2, 2))
        .collect();
    let mut surface = Surface::from_points(cube.grid(), "patch", points).unwrap();

    let values = surface.cube_values(&mut cube, 3).unwrap();
    assert_eq!(values.dim(), (3, 3, 3));
    for k in 0..3 {
        assert_eq!(values[[0, 0, k]], (19 + k) as f32);
        assert_eq!(values[[2, 2, k]], (19 + k) as f32);
        assert!(values[[1, 1, k]].is_nan());
    }

    // Windows sticking out of the cube are NaN-padded
    let mut top = Surface::from_points(cube.grid(), "top", vec![[0, 0, 0]]).unwrap();
    let values = top.cube_values(&mut cube, 3).unwrap();
    assert!(values[[0, 0, 0]].is_nan());
    assert_eq!(values[[0, 0, 1]], 0.0);
    assert_eq!(values[[0, 0, 2]], 1.0);

    // A surface from another grid is rejected
    let foreign = GridGeometry {
        shape: [4, 4, 10],
        iline_offset: 0,
        xline_offset: 0,
        delay: 0.0,
        sample_interval: 2.0,
    };
    let mut stray = Surface::from_points(foreign, "stray", vec![[1, 1, 5]]).unwrap();
    assert!(stray.cube_values(&mut cube, 3).is_err());
}

#[test]
fn extraction_and_merging_recover_a_surface() {
    let grid = GridGeometry {
        shape: [30, 30, 80],
        iline_offset: 0,
        xline_offset: 0,
        delay: 0.0,
        sample_interval: 2.0,
    };

    // One flat sheet presented to extraction as two disjoint mask crops
    let mut left = Array3::<f32>::zeros((30, 14, 80));
    let mut right = Array3::<f32>::zeros((30, 14, 80));
    for i in 0..30 {
        for x in 0..14 {
            left[[i, x, 25]] = 0.9;
            right[[i, x, 25]] = 0.9;
        }
    }

    let params = ExtractParams::default();
    let mut fragments = surfaces_from_mask(&left, [0, 0, 0], grid, &params).unwrap();
    fragments.extend(surfaces_from_mask(&right, [0, 14, 0], grid, &params).unwrap());
    assert_eq!(fragments.len(), 2);

    let merge_params = MergeParams::default();
    {
        let mut iter = fragments.iter_mut();
        let (a, b) = (iter.next().unwrap(), iter.next().unwrap());
        assert_eq!(verify_merge(a, b, &merge_params), MergeStatus::Adjacent);
    }

    let merged = merge_list(fragments, &merge_params).unwrap();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].len(), 30 * 28);
    assert_eq!(merged[0].depth_range(), (25, 25));

    // Merging the result with itself changes nothing
    let mut a = merged[0].clone();
    let mut b = merged[0].clone();
    let again = seiscube::overlap_merge(&mut a, &mut b).unwrap();
    assert_eq!(again.len(), merged[0].len());
    assert_eq!(again.depth_range(), merged[0].depth_range());
}

#[test]
fn surface_filter_uses_cube_dead_traces() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gappy.sgy");

    // A volume with genuinely dead columns
    let mut data = synthetic_volume();
    for h in 0..50 {
        data[[0, 0, h]] = 0.0;
        data[[1, 1, h]] = 0.0;
    }
    let spec = ColumnarSpec {
        ilines: (0..16).collect(),
        xlines: (0..12).collect(),
        sample_interval: 2.0,
        delay: 0,
    };
    write_columnar(&path, &data, &spec).unwrap();

    let mut cube = Cube::open(&path).unwrap();
    let dead = cube.zero_traces().unwrap();
    assert_eq!(dead[[0, 0]], 1);
    assert_eq!(dead[[5, 5]], 0);

    let mut points = Vec::new();
    for i in 0..16 {
        for x in 0..12 {
            points.push([i, x, 20]);
        }
    }
    let mut surface = Surface::from_points(cube.grid(), "cover", points).unwrap();
    surface.filter(&dead).unwrap();
    assert_eq!(surface.len(), 16 * 12 - 2);
    assert_eq!(surface.depth_at(0, 0), None);

    // A full-grid zero-trace matrix never marks live columns
    let full = Array2::from_shape_fn((16, 12), |(i, x)| dead[[i, x]]);
    assert_eq!(full.iter().filter(|&&v| v != 0).count(), 2);
}
