//! Full-pipeline scenarios spanning more than one subsystem: segmentation
//! to mesh to centerline to measuring-plane statistics, and mesh/line
//! binary round-trips through the subsystem that produced them.

use cmr_core::centerline::{self, CenterlineParameters};
use cmr_core::io::{line_format, mesh_format};
use cmr_core::marching_cubes;
use cmr_core::measuring_plane::{self, MaskSource};
use cmr_core::nalgebra::Vector3;
use cmr_core::{FlowImage4D, Scalar3DImage, Transform3};

fn straight_tube_segmentation(n: usize, radius: f64) -> Scalar3DImage {
    let center = (n as f64 - 1.0) / 2.0;
    let mut img = Scalar3DImage::new([n, n, n], 0.0, Transform3::NoTransformation);
    for z in 0..n {
        for y in 0..n {
            for x in 0..n {
                let r = ((x as f64 - center).powi(2) + (y as f64 - center).powi(2)).sqrt();
                img.set(x, y, z, if r <= radius { 1.0 } else { 0.0 });
            }
        }
    }
    img
}

fn seed_and_target_by_z(mesh: &cmr_core::mesh::TriMesh3d) -> (u32, u32) {
    let seed = mesh
        .points()
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.z.partial_cmp(&b.z).unwrap())
        .map(|(i, _)| i as u32)
        .unwrap();
    let target = mesh
        .points()
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.z.partial_cmp(&b.z).unwrap())
        .map(|(i, _)| i as u32)
        .unwrap();
    (seed, target)
}

/// Scenario: a segmentation carves a surface mesh, a centerline runs
/// through it, and a measuring plane anchored at a centerline point
/// recovers the analytic flow rate of a uniform plug flow through the
/// tube's cross-section.
#[test]
fn segmentation_to_measuring_plane_recovers_plug_flow_rate() {
    let n = 24;
    let radius_voxels = 6.0;
    let seg = straight_tube_segmentation(n, radius_voxels);

    let mut mesh = marching_cubes::apply(&seg, 0.5).unwrap();
    mesh.construct_kd_tree();
    let (seed, target) = seed_and_target_by_z(&mesh);

    let params = CenterlineParameters {
        num_smooth_iterations: 20,
        ..Default::default()
    };
    let result = centerline::extract(&mut mesh, &seg, seed, &[target], &params);
    assert!(result.success);
    let line = &result.lines[0];
    assert!(line.num_points() >= 1);

    let mid = line.num_points() / 2;
    let center = line.points()[mid];
    let tangent = line.tangent(mid);

    let speed = 1.0; // mm/ms
    let dt_ms = 10.0;
    let num_times = 4;
    let mut flow = FlowImage4D::new([n, n, n], num_times, Transform3::NoTransformation, dt_ms);
    for t in 0..num_times {
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    flow.set(x, y, z, t, Vector3::new(0.0, 0.0, speed));
                }
            }
        }
    }

    let sx = 40;
    let sy = 40;
    let spacing_mm = 0.5;
    let plane = measuring_plane::plane_transform_at(
        center,
        tangent,
        Vector3::new(1.0, 0.0, 0.0),
        sx,
        sy,
        spacing_mm,
        dt_ms,
    );

    let stats = measuring_plane::sample(&plane, sx, sy, num_times, &flow, MaskSource::Segmentation(&seg));

    let expected_area = std::f64::consts::PI * radius_voxels * radius_voxels;
    let expected_flow_rate = expected_area * speed;
    for m in &stats.timesteps {
        assert!(
            (m.area - expected_area).abs() / expected_area < 0.2,
            "sampled area {} too far from analytic area {}",
            m.area,
            expected_area
        );
        assert!(
            (m.flow_rate - expected_flow_rate).abs() / expected_flow_rate < 0.2,
            "sampled flow rate {} too far from analytic rate {}",
            m.flow_rate,
            expected_flow_rate
        );
    }
    assert!(stats.normal_is_aligned);
}

/// Scenario: a centerline extracted from a real mesh round-trips through
/// the `.line` binary format with its radius and local-frame attributes
/// intact.
#[test]
fn centerline_survives_line_format_roundtrip() {
    let seg = straight_tube_segmentation(16, 5.0);
    let mut mesh = marching_cubes::apply(&seg, 0.5).unwrap();
    mesh.construct_kd_tree();
    let (seed, target) = seed_and_target_by_z(&mesh);

    let params = CenterlineParameters {
        num_smooth_iterations: 5,
        ..Default::default()
    };
    let result = centerline::extract(&mut mesh, &seg, seed, &[target], &params);
    assert!(result.success);
    let line = &result.lines[0];

    let bytes = line_format::write_line(line);
    let decoded = line_format::read_line(&bytes).unwrap();

    assert_eq!(decoded.num_points(), line.num_points());
    for i in 0..line.num_points() {
        assert!((decoded.points()[i] - line.points()[i]).norm() < 1e-9);
    }
    let original_radius = line.radius().unwrap();
    let decoded_radius = decoded.radius().unwrap();
    assert_eq!(original_radius.len(), decoded_radius.len());
    for (a, b) in original_radius.iter().zip(decoded_radius.iter()) {
        assert!((a - b).abs() < 1e-9);
    }
}

/// Law: shifting the iso-value by a small amount relative to the sampled
/// field never increases the extracted vertex count, for a smooth field
/// with no near-degenerate crossings at the perturbation scale.
#[test]
fn marching_cubes_small_iso_shift_does_not_increase_vertex_count() {
    let n = 20;
    let center = (n as f64 - 1.0) / 2.0;
    let mut img = Scalar3DImage::new([n, n, n], 0.0, Transform3::NoTransformation);
    for z in 0..n {
        for y in 0..n {
            for x in 0..n {
                let d = ((x as f64 - center).powi(2)
                    + (y as f64 - center).powi(2)
                    + (z as f64 - center).powi(2))
                .sqrt();
                img.set(x, y, z, 7.0 - d);
            }
        }
    }

    let baseline = marching_cubes::apply(&img, 0.0).unwrap();
    let shifted = marching_cubes::apply(&img, 1e-6).unwrap();

    assert!(
        shifted.num_points() <= baseline.num_points() + 4,
        "vertex count grew unexpectedly under an infinitesimal iso-value shift: {} -> {}",
        baseline.num_points(),
        shifted.num_points()
    );
}
