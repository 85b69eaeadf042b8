//! Error types for the analysis core.
//!
//! A `#[non_exhaustive]` `thiserror`-derived enum with one variant per
//! named failure mode plus a catch-all for anything not worth a distinct
//! variant.

use thiserror::Error as ThisError;

/// Errors surfaced across subsystem boundaries.
///
/// Numerical degeneracy is recovered locally (logged via `log::warn!`, see
/// [`crate::centerline`]) rather than returned here; this enum is reserved
/// for structural input errors and I/O failures.
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum CmrError {
    /// A 2D (or otherwise wrongly-shaped) image was passed to an operation that
    /// requires a 3D (or 4D) grid, e.g. [`crate::marching_cubes::apply`].
    #[error("input dimension mismatch: expected {expected}, got {actual}")]
    InputDimensionMismatch {
        expected: &'static str,
        actual: String,
    },

    /// An operation was given an empty selection (e.g. no centerline targets,
    /// or a segmentation mask with zero set voxels).
    #[error("empty selection: {0}")]
    EmptySelection(String),

    /// A centerline target was never reached, even after frontier expansion.
    /// The caller should skip this target and continue with the others; this
    /// variant is used when no targets at all survive.
    #[error("target vertex {0} unreachable from seed")]
    UnreachableTarget(u32),

    /// Reading or writing a `.line`/`.mesh` file failed.
    #[error("I/O failure: {0}")]
    IoFailure(String),

    /// The Boykov-Kolmogorov active-tree loop exceeded its iteration safety
    /// cap without converging. Finite-capacity lattices always converge; this
    /// indicates a malformed capacity graph (e.g. a negative capacity).
    #[error("graph cut did not converge after {0} iterations")]
    GraphCutDidNotConverge(usize),

    /// Any error that is not represented by some other explicit variant.
    #[error("unknown error")]
    Unknown(#[from] anyhow::Error),
}

impl From<std::io::Error> for CmrError {
    fn from(e: std::io::Error) -> Self {
        CmrError::IoFailure(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CmrError>;
