//! Binary `.mesh` format: analogous to [`crate::io::line_format`], with
//! triangle topology instead of polyline edges.
//!
//! Geometry: `u32 num_dims, u32 num_points, f64 point[num_points*num_dims],
//! attributes_section`. Topology: `u32 num_triangles, (u32,u32,u32)*num_triangles`.

use super::{read_attributes, read_f64, read_u32, write_attributes};
use crate::error::{CmrError, Result};
use crate::mesh::TriMesh3d;
use nalgebra::Vector3;

const NUM_DIMS: u32 = 3;

/// Encodes a mesh to the binary `.mesh` layout.
pub fn write_mesh(mesh: &TriMesh3d) -> Vec<u8> {
    let mut buf = Vec::new();

    buf.extend_from_slice(&NUM_DIMS.to_le_bytes());
    buf.extend_from_slice(&(mesh.num_points() as u32).to_le_bytes());
    for p in mesh.points() {
        buf.extend_from_slice(&p.x.to_le_bytes());
        buf.extend_from_slice(&p.y.to_le_bytes());
        buf.extend_from_slice(&p.z.to_le_bytes());
    }
    write_attributes(&mut buf, mesh.attributes());

    buf.extend_from_slice(&(mesh.num_triangles() as u32).to_le_bytes());
    for tri in mesh.triangles() {
        buf.extend_from_slice(&tri[0].to_le_bytes());
        buf.extend_from_slice(&tri[1].to_le_bytes());
        buf.extend_from_slice(&tri[2].to_le_bytes());
    }

    buf
}

/// Decodes a mesh previously written by [`write_mesh`].
pub fn read_mesh(bytes: &[u8]) -> Result<TriMesh3d> {
    let mut cursor = 0usize;

    let num_dims = read_u32(bytes, &mut cursor)?;
    if num_dims != NUM_DIMS {
        return Err(CmrError::IoFailure(format!(
            "expected {NUM_DIMS}-dimensional points, found {num_dims}"
        )));
    }

    let num_points = read_u32(bytes, &mut cursor)? as usize;
    let mut points = Vec::with_capacity(num_points);
    for _ in 0..num_points {
        let x = read_f64(bytes, &mut cursor)?;
        let y = read_f64(bytes, &mut cursor)?;
        let z = read_f64(bytes, &mut cursor)?;
        points.push(Vector3::new(x, y, z));
    }

    let attributes = read_attributes(bytes, &mut cursor)?;

    let num_triangles = read_u32(bytes, &mut cursor)? as usize;
    let mut triangles = Vec::with_capacity(num_triangles);
    for _ in 0..num_triangles {
        let a = read_u32(bytes, &mut cursor)?;
        let b = read_u32(bytes, &mut cursor)?;
        let c = read_u32(bytes, &mut cursor)?;
        if a as usize >= num_points || b as usize >= num_points || c as usize >= num_points {
            return Err(CmrError::IoFailure(
                "triangle references out-of-range point index".into(),
            ));
        }
        triangles.push([a, b, c]);
    }

    let mut mesh = TriMesh3d::with_geometry(points, triangles);
    for (name, data) in attributes {
        mesh.set_attribute(name, data);
    }
    mesh.recompute_vertex_normals();

    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marching_cubes;
    use crate::transform::Transform3;

    fn sphere_image(n: usize, radius: f64) -> crate::Scalar3DImage {
        let center = (n as f64 - 1.0) / 2.0;
        let mut img = crate::Scalar3DImage::new([n, n, n], 0.0, Transform3::NoTransformation);
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    let d = ((x as f64 - center).powi(2)
                        + (y as f64 - center).powi(2)
                        + (z as f64 - center).powi(2))
                    .sqrt();
                    img.set(x, y, z, radius - d);
                }
            }
        }
        img
    }

    #[test]
    fn roundtrips_sphere_mesh_geometry_and_topology() {
        let img = sphere_image(12, 4.0);
        let mesh = marching_cubes::apply(&img, 0.0).unwrap();

        let bytes = write_mesh(&mesh);
        let decoded = read_mesh(&bytes).unwrap();

        assert_eq!(decoded.num_points(), mesh.num_points());
        assert_eq!(decoded.num_triangles(), mesh.num_triangles());
        assert_eq!(decoded.triangles(), mesh.triangles());
    }

    #[test]
    fn rejects_out_of_range_triangle_index() {
        let mesh = TriMesh3d::with_geometry(
            vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0)],
            vec![[0, 1, 5]],
        );
        let bytes = write_mesh(&mesh);
        assert!(read_mesh(&bytes).is_err());
    }
}
