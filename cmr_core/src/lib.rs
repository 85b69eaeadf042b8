//!
//! Computational core for 4D phase-contrast flow MRI analysis: surface
//! extraction from vessel segmentations, centerline extraction with
//! rotation-minimizing frames, N-dimensional graph cuts, and measuring-plane
//! hemodynamic statistics.
//!

/// Re-export the version of nalgebra used by this crate
pub use nalgebra;

pub mod centerline;
pub mod error;
mod flow_image;
pub mod graphcut;
mod image;
pub mod io;
pub mod marching_cubes;
pub mod measuring_plane;
pub mod mesh;
mod numeric_types;
pub mod otsu;
pub mod smoothing;
pub mod transform;

pub use error::{CmrError, Result};
pub use flow_image::FlowImage4D;
pub use image::Scalar3DImage;
pub use numeric_types::{Real, ThreadSafe};
pub use transform::{PlaneTransform, Transform3};

type HashState = fxhash::FxBuildHasher;
pub(crate) type MapType<K, V> = std::collections::HashMap<K, V, HashState>;
pub(crate) fn new_map<K, V>() -> MapType<K, V> {
    MapType::with_hasher(HashState::default())
}

pub(crate) type ParallelMapType<K, V> = dashmap::DashMap<K, V, HashState>;

/// Initializes rayon's global thread pool with the given number of threads.
///
/// Internally, most crate functions that use parallelism are implemented
/// using the [rayon] crate. If you don't call this function to initialize
/// the global thread pool used by rayon, it will use a default
/// initialization strategy to select the number of threads (see
/// [rayon::ThreadPoolBuilder::build_global]).
///
/// Note that it is only possible to initialize the thread pool once per
/// process. Therefore, if you call `initialize_thread_pool` a second time,
/// it will return an error.
pub fn initialize_thread_pool(num_threads: usize) -> anyhow::Result<()> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()?;
    Ok(())
}
