//! Indexed triangle mesh with lazily-built kd-tree.

pub mod attributes;

use crate::new_map;
use crate::MapType;
pub use attributes::{AttributeData, AttributeKind};
use nalgebra::Vector3;
use rstar::{PointDistance, RTree, RTreeObject, AABB};

/// Point stored in the mesh's kd-tree, carrying back a reference to its index
/// in the mesh's point array.
#[derive(Clone, Copy, Debug)]
struct IndexedPoint {
    index: u32,
    pos: [f64; 3],
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.pos)
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f64; 3]) -> f64 {
        let dx = self.pos[0] - point[0];
        let dy = self.pos[1] - point[1];
        let dz = self.pos[2] - point[2];
        dx * dx + dy * dy + dz * dz
    }
}

/// Result of a nearest-point query against a mesh's kd-tree.
#[derive(Clone, Copy, Debug)]
pub struct ClosestPoint {
    pub point_index: u32,
    pub point: Vector3<f64>,
    pub distance_to_query: f64,
}

/// CSR-encoded point-to-point adjacency.
#[derive(Clone, Debug, Default)]
pub struct Adjacency {
    offsets: Vec<u32>,
    neighbors: Vec<u32>,
}

impl Adjacency {
    pub fn neighbors_of(&self, point: u32) -> &[u32] {
        let start = self.offsets[point as usize] as usize;
        let end = self.offsets[point as usize + 1] as usize;
        &self.neighbors[start..end]
    }
}

/// An indexed triangle mesh: geometry (points, optional normals, attribute
/// map) plus topology (CCW triangles).
#[derive(Clone, Debug, Default)]
pub struct TriMesh3d {
    points: Vec<Vector3<f64>>,
    normals: Vec<Vector3<f64>>,
    triangles: Vec<[u32; 3]>,
    attributes: MapType<String, AttributeData>,
    adjacency: Option<Adjacency>,
    kdtree: Option<RTree<IndexedPoint>>,
}

impl TriMesh3d {
    pub fn new() -> Self {
        Self {
            attributes: new_map(),
            ..Default::default()
        }
    }

    pub fn with_geometry(points: Vec<Vector3<f64>>, triangles: Vec<[u32; 3]>) -> Self {
        let mut mesh = Self::new();
        mesh.points = points;
        mesh.triangles = triangles;
        mesh
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn num_triangles(&self) -> usize {
        self.triangles.len()
    }

    pub fn points(&self) -> &[Vector3<f64>] {
        &self.points
    }

    pub fn point(&self, i: u32) -> Vector3<f64> {
        self.points[i as usize]
    }

    pub fn triangles(&self) -> &[[u32; 3]] {
        &self.triangles
    }

    pub fn normals(&self) -> &[Vector3<f64>] {
        &self.normals
    }

    /// Appends a point, invalidating the kd-tree.
    pub fn push_point(&mut self, p: Vector3<f64>) -> u32 {
        let idx = self.points.len() as u32;
        self.points.push(p);
        self.invalidate_derived();
        idx
    }

    pub fn push_triangle(&mut self, tri: [u32; 3]) {
        debug_assert!(tri.iter().all(|&i| (i as usize) < self.points.len()));
        debug_assert!(tri[0] != tri[1] && tri[1] != tri[2] && tri[0] != tri[2]);
        self.triangles.push(tri);
        self.invalidate_derived();
    }

    fn invalidate_derived(&mut self) {
        self.kdtree = None;
        self.adjacency = None;
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.normals.clear();
        self.triangles.clear();
        self.attributes.clear();
        self.invalidate_derived();
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeData> {
        self.attributes.get(name)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, data: AttributeData) {
        self.attributes.insert(name.into(), data);
    }

    pub(crate) fn attributes(&self) -> &MapType<String, AttributeData> {
        &self.attributes
    }

    pub fn has_kdtree(&self) -> bool {
        self.kdtree.is_some()
    }

    /// Builds the kd-tree over the mesh's points. Must be called before
    /// [`closest_point`](Self::closest_point) or [`is_inside`](Self::is_inside).
    pub fn construct_kd_tree(&mut self) {
        let pts: Vec<IndexedPoint> = self
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| IndexedPoint {
                index: i as u32,
                pos: [p.x, p.y, p.z],
            })
            .collect();
        self.kdtree = Some(RTree::bulk_load(pts));
    }

    /// Nearest mesh point to an arbitrary query point.
    ///
    /// Panics if [`construct_kd_tree`](Self::construct_kd_tree) has not been called;
    /// callers (e.g. [`crate::centerline`]) are expected to build it once up front.
    pub fn closest_point(&self, query: Vector3<f64>) -> ClosestPoint {
        let tree = self
            .kdtree
            .as_ref()
            .expect("kd-tree not built: call construct_kd_tree() first");
        let q = [query.x, query.y, query.z];
        let nearest = tree
            .nearest_neighbor(&q)
            .expect("kd-tree query on empty mesh");
        let point = self.points[nearest.index as usize];
        ClosestPoint {
            point_index: nearest.index,
            point,
            distance_to_query: (point - query).norm(),
        }
    }

    /// Builds (or returns the cached) CSR point adjacency.
    pub fn adjacency(&mut self) -> &Adjacency {
        if self.adjacency.is_none() {
            self.adjacency = Some(self.build_adjacency());
        }
        self.adjacency.as_ref().unwrap()
    }

    fn build_adjacency(&self) -> Adjacency {
        let n = self.points.len();
        let mut neighbor_sets: Vec<Vec<u32>> = vec![Vec::new(); n];

        for tri in &self.triangles {
            for i in 0..3 {
                let a = tri[i] as usize;
                let b = tri[(i + 1) % 3];
                if !neighbor_sets[a].contains(&b) {
                    neighbor_sets[a].push(b);
                }
            }
        }

        let mut offsets = Vec::with_capacity(n + 1);
        let mut neighbors = Vec::new();
        offsets.push(0u32);
        for set in &neighbor_sets {
            neighbors.extend_from_slice(set);
            offsets.push(neighbors.len() as u32);
        }

        Adjacency { offsets, neighbors }
    }

    /// Recomputes vertex normals as the area-weighted average of adjacent
    /// triangle face normals, using the outward CCW convention
    /// `(p1-p0) x (p2-p0)`.
    pub fn recompute_vertex_normals(&mut self) {
        let mut normals = vec![Vector3::zeros(); self.points.len()];

        for tri in &self.triangles {
            let p0 = self.points[tri[0] as usize];
            let p1 = self.points[tri[1] as usize];
            let p2 = self.points[tri[2] as usize];
            let face_normal = (p1 - p0).cross(&(p2 - p0));

            for &idx in tri {
                normals[idx as usize] += face_normal;
            }
        }

        for n in &mut normals {
            let len = n.norm();
            if len > 1e-12 {
                *n /= len;
            }
        }

        self.normals = normals;
    }

    /// Ray-casting point-in-mesh test (even-odd rule), used to build the
    /// cross-sectional mask of a measuring plane.
    ///
    /// Requires a closed (watertight) mesh, as produced by
    /// [`crate::marching_cubes::apply`]. The cast direction is the world
    /// `+x` axis; ties (ray passing exactly through an edge/vertex) are
    /// resolved by nudging the query point by a tiny epsilon, which is
    /// sufficient for the measuring-plane use case where query points are
    /// regularly spaced pixel centers essentially never landing exactly on
    /// a mesh edge.
    pub fn is_inside(&self, point: Vector3<f64>) -> bool {
        let dir = Vector3::new(1.0, 1e-9, 1e-9);
        let mut crossings = 0usize;

        for tri in &self.triangles {
            let p0 = self.points[tri[0] as usize];
            let p1 = self.points[tri[1] as usize];
            let p2 = self.points[tri[2] as usize];
            if ray_triangle_intersect(point, dir, p0, p1, p2) {
                crossings += 1;
            }
        }

        crossings % 2 == 1
    }
}

/// Möller–Trumbore ray/triangle intersection test, counting only intersections
/// with `t > 0` (ahead of the ray origin).
fn ray_triangle_intersect(
    origin: Vector3<f64>,
    dir: Vector3<f64>,
    v0: Vector3<f64>,
    v1: Vector3<f64>,
    v2: Vector3<f64>,
) -> bool {
    const EPS: f64 = 1e-12;
    let edge1 = v1 - v0;
    let edge2 = v2 - v0;
    let h = dir.cross(&edge2);
    let a = edge1.dot(&h);
    if a.abs() < EPS {
        return false;
    }
    let f = 1.0 / a;
    let s = origin - v0;
    let u = f * s.dot(&h);
    if !(0.0..=1.0).contains(&u) {
        return false;
    }
    let q = s.cross(&edge1);
    let v = f * dir.dot(&q);
    if v < 0.0 || u + v > 1.0 {
        return false;
    }
    let t = f * edge2.dot(&q);
    t > EPS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_cube() -> TriMesh3d {
        // Axis-aligned unit cube centered at origin, 12 triangles, outward normals.
        let p = [
            Vector3::new(-1.0, -1.0, -1.0),
            Vector3::new(1.0, -1.0, -1.0),
            Vector3::new(1.0, 1.0, -1.0),
            Vector3::new(-1.0, 1.0, -1.0),
            Vector3::new(-1.0, -1.0, 1.0),
            Vector3::new(1.0, -1.0, 1.0),
            Vector3::new(1.0, 1.0, 1.0),
            Vector3::new(-1.0, 1.0, 1.0),
        ];
        let tris = vec![
            [0, 2, 1], [0, 3, 2], // -z
            [4, 5, 6], [4, 6, 7], // +z
            [0, 1, 5], [0, 5, 4], // -y
            [3, 7, 6], [3, 6, 2], // +y
            [0, 4, 7], [0, 7, 3], // -x
            [1, 2, 6], [1, 6, 5], // +x
        ];
        TriMesh3d::with_geometry(p.to_vec(), tris)
    }

    #[test]
    fn point_inside_cube_is_detected() {
        let mesh = unit_cube();
        assert!(mesh.is_inside(Vector3::new(0.0, 0.0, 0.0)));
        assert!(!mesh.is_inside(Vector3::new(5.0, 0.0, 0.0)));
    }

    #[test]
    fn kd_tree_finds_exact_nearest_point() {
        let mut mesh = unit_cube();
        mesh.construct_kd_tree();
        let result = mesh.closest_point(Vector3::new(0.9, -0.9, -0.9));
        assert_eq!(result.point, Vector3::new(1.0, -1.0, -1.0));
    }

    #[test]
    fn adjacency_lists_triangle_neighbors() {
        let mut mesh = unit_cube();
        let adj = mesh.adjacency();
        assert!(!adj.neighbors_of(0).is_empty());
    }
}
