//! Input formats specific to this binary.
//!
//! `cmr_core` only defines on-disk formats for the artifacts it produces
//! (`.line`, `.mesh`); raw image and capacity-graph input are this CLI's
//! own concern, so they get the same hand-rolled little-endian layout the
//! core uses for its own formats rather than pulling in a separate image
//! library.

use anyhow::{bail, Context, Result};
use cmr_core::nalgebra::Vector3;
use cmr_core::{Scalar3DImage, Transform3};
use std::fs;
use std::path::Path;

/// Raw scalar grid layout: `u32 nx, ny, nz, f64 origin[3], f64 scale[3],
/// f64 values[nx*ny*nz]` (row-major, x fastest), all little-endian.
pub fn load_scalar_image(path: &Path) -> Result<Scalar3DImage> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut cursor = 0usize;

    let nx = read_u32(&bytes, &mut cursor)? as usize;
    let ny = read_u32(&bytes, &mut cursor)? as usize;
    let nz = read_u32(&bytes, &mut cursor)? as usize;
    let origin = read_vec3(&bytes, &mut cursor)?;
    let scale = read_vec3(&bytes, &mut cursor)?;

    let mut image = Scalar3DImage::new([nx, ny, nz], 0.0, Transform3::new(origin, scale));
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                image.set(x, y, z, read_f64(&bytes, &mut cursor)?);
            }
        }
    }
    Ok(image)
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    let end = *cursor + 4;
    if end > bytes.len() {
        bail!("truncated input");
    }
    let v = u32::from_le_bytes(bytes[*cursor..end].try_into().unwrap());
    *cursor = end;
    Ok(v)
}

fn read_f64(bytes: &[u8], cursor: &mut usize) -> Result<f64> {
    let end = *cursor + 8;
    if end > bytes.len() {
        bail!("truncated input");
    }
    let v = f64::from_le_bytes(bytes[*cursor..end].try_into().unwrap());
    *cursor = end;
    Ok(v)
}

fn read_vec3(bytes: &[u8], cursor: &mut usize) -> Result<Vector3<f64>> {
    let x = read_f64(bytes, cursor)?;
    let y = read_f64(bytes, cursor)?;
    let z = read_f64(bytes, cursor)?;
    Ok(Vector3::new(x, y, z))
}

/// Capacity graph for the `graphcut` subcommand: a text format, one
/// directive per line.
///
/// ```text
/// shape <n0> <n1> ...
/// source <c0> <c1> ... <cap>
/// sink <c0> <c1> ... <cap>
/// edge <c0> <c1> ... <axis> <forward> <backward>
/// ```
pub struct CapacityGraph {
    pub shape: Vec<usize>,
    pub sources: Vec<(Vec<usize>, f64)>,
    pub sinks: Vec<(Vec<usize>, f64)>,
    pub edges: Vec<(Vec<usize>, usize, f64, f64)>,
}

pub fn load_capacity_graph(path: &Path) -> Result<CapacityGraph> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;

    let mut shape = None;
    let mut sources = Vec::new();
    let mut sinks = Vec::new();
    let mut edges = Vec::new();

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.first().copied() {
            Some("shape") => {
                shape = Some(parse_usize_list(&tokens[1..], lineno)?);
            }
            Some("source") => {
                let ndim = shape_len(&shape, lineno)?;
                let (coords, cap) = parse_terminal(&tokens[1..], ndim, lineno)?;
                sources.push((coords, cap));
            }
            Some("sink") => {
                let ndim = shape_len(&shape, lineno)?;
                let (coords, cap) = parse_terminal(&tokens[1..], ndim, lineno)?;
                sinks.push((coords, cap));
            }
            Some("edge") => {
                let ndim = shape_len(&shape, lineno)?;
                if tokens.len() != 1 + ndim + 3 {
                    bail!("line {}: malformed edge directive", lineno + 1);
                }
                let coords = parse_usize_list(&tokens[1..1 + ndim], lineno)?;
                let axis: usize = tokens[1 + ndim]
                    .parse()
                    .with_context(|| format!("line {}: bad axis", lineno + 1))?;
                let forward: f64 = tokens[2 + ndim]
                    .parse()
                    .with_context(|| format!("line {}: bad forward capacity", lineno + 1))?;
                let backward: f64 = tokens[3 + ndim]
                    .parse()
                    .with_context(|| format!("line {}: bad backward capacity", lineno + 1))?;
                edges.push((coords, axis, forward, backward));
            }
            Some(other) => bail!("line {}: unknown directive '{other}'", lineno + 1),
            None => {}
        }
    }

    let shape = shape.context("capacity file is missing a 'shape' directive")?;
    Ok(CapacityGraph {
        shape,
        sources,
        sinks,
        edges,
    })
}

fn shape_len(shape: &Option<Vec<usize>>, lineno: usize) -> Result<usize> {
    shape
        .as_ref()
        .map(|s| s.len())
        .with_context(|| format!("line {}: 'shape' must precede this directive", lineno + 1))
}

fn parse_usize_list(tokens: &[&str], lineno: usize) -> Result<Vec<usize>> {
    tokens
        .iter()
        .map(|t| {
            t.parse::<usize>()
                .with_context(|| format!("line {}: expected an integer, got '{t}'", lineno + 1))
        })
        .collect()
}

fn parse_terminal(tokens: &[&str], ndim: usize, lineno: usize) -> Result<(Vec<usize>, f64)> {
    if tokens.len() != ndim + 1 {
        bail!("line {}: expected {ndim} coordinates and a capacity", lineno + 1);
    }
    let coords = parse_usize_list(&tokens[..ndim], lineno)?;
    let cap: f64 = tokens[ndim]
        .parse()
        .with_context(|| format!("line {}: bad capacity", lineno + 1))?;
    Ok((coords, cap))
}
