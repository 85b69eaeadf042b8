//! Registered attribute schema for mesh/line point data.
//!
//! The original codebase keys a type-erased `std::any`-backed map by
//! string name; this re-expresses that as a registered schema: a fixed
//! enum of known attribute kinds, each with its concrete vector type,
//! plus an optional open-ended blob map for user extensions.
//! [`AttributeData`] is that concrete-vector-type union; [`AttributeKind`]
//! names the well-known ones used by this crate so hot paths (radius
//! lookup, local-frame lookup, velocity-through-plane lookup) never need
//! a runtime type cast.

use nalgebra::{Matrix3, Vector3};

/// Well-known point attributes produced by the core subsystems.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    /// Per-point vessel radius.
    Radius,
    /// Per-point rotation-minimizing local coordinate frame (`Line3D`).
    LocalCoordinateSystem,
    /// Per-point vertex normal (`TriangularMesh3D`).
    Normal,
    /// Per-cell through-plane velocity component (`MeasuringPlane`).
    VelocityThroughPlane,
}

impl AttributeKind {
    /// The name used when the attribute is looked up in the open-ended map,
    /// matching the string keys the original C++ attribute maps used.
    pub fn name(&self) -> &'static str {
        match self {
            AttributeKind::Radius => "radius",
            AttributeKind::LocalCoordinateSystem => "local_coordinate_system",
            AttributeKind::Normal => "normal",
            AttributeKind::VelocityThroughPlane => "velocity_through_plane",
        }
    }
}

/// Concrete payload for a registered attribute, one variant per vector type
/// actually produced anywhere in the core.
#[derive(Clone, Debug)]
pub enum AttributeData {
    Scalar(Vec<f64>),
    Vector3(Vec<Vector3<f64>>),
    Frame3(Vec<Matrix3<f64>>),
}

impl AttributeData {
    pub fn as_scalar(&self) -> Option<&[f64]> {
        match self {
            AttributeData::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_scalar_mut(&mut self) -> Option<&mut Vec<f64>> {
        match self {
            AttributeData::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_vector3(&self) -> Option<&[Vector3<f64>]> {
        match self {
            AttributeData::Vector3(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_frame3(&self) -> Option<&[Matrix3<f64>]> {
        match self {
            AttributeData::Frame3(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_frame3_mut(&mut self) -> Option<&mut Vec<Matrix3<f64>>> {
        match self {
            AttributeData::Frame3(v) => Some(v),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            AttributeData::Scalar(v) => v.len(),
            AttributeData::Vector3(v) => v.len(),
            AttributeData::Frame3(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
