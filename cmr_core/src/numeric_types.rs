//! Numeric trait bounds shared across the crate.
//!
//! Clinical measurement precision calls for double precision throughout, so
//! the concrete types (`Scalar3DImage`, `FlowImage4D`, `TriMesh3d`, `Line3D`)
//! are hard-coded to `f64`. The lower-level generic numeric utilities
//! (Taubin/binomial smoothing, interpolation) stay generic over [`Real`] the
//! way `splashsurf_lib` keeps its hot-path math generic over `f32`/`f64`.

use nalgebra::RealField;
use num::NumCast;

/// A floating point type usable throughout the analysis pipeline.
pub trait Real:
    RealField + Copy + NumCast + Send + Sync + bytemuck::Pod + bytemuck::Zeroable + 'static
{
    /// Converts a value of this `Real` type to another `Real` type, if representable.
    fn try_convert<T: Real>(self) -> Option<T> {
        NumCast::from(self)
    }
}

impl Real for f32 {}
impl Real for f64 {}

/// Marker trait for types that can safely cross thread boundaries, matching
/// the bound `splashsurf_lib` uses to gate its `rayon`-parallel code paths.
pub trait ThreadSafe: Send + Sync {}
impl<T: Send + Sync> ThreadSafe for T {}
