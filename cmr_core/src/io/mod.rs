//! On-disk binary formats for lines and meshes.
//!
//! Raw buffer construction without an external serialization crate, the
//! way `splashsurf`'s own VTK writer builds its binary payload by hand.

pub mod line_format;
pub mod mesh_format;

use crate::error::{CmrError, Result};
use crate::mesh::AttributeData;
use crate::MapType;
use nalgebra::{Matrix3, Vector3};

/// Type tags for the attribute section shared by `.line` and `.mesh`.
const TAG_SCALAR: u8 = 0;
const TAG_VECTOR3: u8 = 1;
const TAG_FRAME3: u8 = 2;

fn write_attributes(buf: &mut Vec<u8>, attributes: &MapType<String, AttributeData>) {
    buf.extend_from_slice(&(attributes.len() as u16).to_le_bytes());
    for (name, data) in attributes {
        let name_bytes = name.as_bytes();
        buf.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        buf.extend_from_slice(name_bytes);

        let mut payload = Vec::new();
        let tag = match data {
            AttributeData::Scalar(v) => {
                for x in v {
                    payload.extend_from_slice(&x.to_le_bytes());
                }
                TAG_SCALAR
            }
            AttributeData::Vector3(v) => {
                for p in v {
                    payload.extend_from_slice(&p.x.to_le_bytes());
                    payload.extend_from_slice(&p.y.to_le_bytes());
                    payload.extend_from_slice(&p.z.to_le_bytes());
                }
                TAG_VECTOR3
            }
            AttributeData::Frame3(v) => {
                for m in v {
                    for col in m.column_iter() {
                        payload.extend_from_slice(&col[0].to_le_bytes());
                        payload.extend_from_slice(&col[1].to_le_bytes());
                        payload.extend_from_slice(&col[2].to_le_bytes());
                    }
                }
                TAG_FRAME3
            }
        };

        buf.push(tag);
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);
    }
}

fn read_attributes(bytes: &[u8], cursor: &mut usize) -> Result<MapType<String, AttributeData>> {
    let mut attributes = crate::new_map();
    let num_attributes = read_u16(bytes, cursor)?;

    for _ in 0..num_attributes {
        let name_len = read_u16(bytes, cursor)? as usize;
        let name = read_str(bytes, cursor, name_len)?;
        let tag = read_u8(bytes, cursor)?;
        let payload_len = read_u32(bytes, cursor)? as usize;
        let payload = read_bytes(bytes, cursor, payload_len)?;

        let data = match tag {
            TAG_SCALAR => {
                let values = payload
                    .chunks_exact(8)
                    .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
                    .collect();
                AttributeData::Scalar(values)
            }
            TAG_VECTOR3 => {
                let values = payload
                    .chunks_exact(24)
                    .map(|c| {
                        Vector3::new(
                            f64::from_le_bytes(c[0..8].try_into().unwrap()),
                            f64::from_le_bytes(c[8..16].try_into().unwrap()),
                            f64::from_le_bytes(c[16..24].try_into().unwrap()),
                        )
                    })
                    .collect();
                AttributeData::Vector3(values)
            }
            TAG_FRAME3 => {
                let values = payload
                    .chunks_exact(72)
                    .map(|c| {
                        let col = |base: usize| {
                            Vector3::new(
                                f64::from_le_bytes(c[base..base + 8].try_into().unwrap()),
                                f64::from_le_bytes(c[base + 8..base + 16].try_into().unwrap()),
                                f64::from_le_bytes(c[base + 16..base + 24].try_into().unwrap()),
                            )
                        };
                        Matrix3::from_columns(&[col(0), col(24), col(48)])
                    })
                    .collect();
                AttributeData::Frame3(values)
            }
            other => {
                return Err(CmrError::IoFailure(format!(
                    "unknown attribute type tag {other}"
                )))
            }
        };

        attributes.insert(name, data);
    }

    Ok(attributes)
}

fn read_u8(bytes: &[u8], cursor: &mut usize) -> Result<u8> {
    let b = *bytes
        .get(*cursor)
        .ok_or_else(|| CmrError::IoFailure("unexpected end of file".into()))?;
    *cursor += 1;
    Ok(b)
}

fn read_u16(bytes: &[u8], cursor: &mut usize) -> Result<u16> {
    let slice = read_bytes(bytes, cursor, 2)?;
    Ok(u16::from_le_bytes(slice.try_into().unwrap()))
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    let slice = read_bytes(bytes, cursor, 4)?;
    Ok(u32::from_le_bytes(slice.try_into().unwrap()))
}

fn read_f64(bytes: &[u8], cursor: &mut usize) -> Result<f64> {
    let slice = read_bytes(bytes, cursor, 8)?;
    Ok(f64::from_le_bytes(slice.try_into().unwrap()))
}

fn read_bytes<'a>(bytes: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = *cursor + len;
    let slice = bytes
        .get(*cursor..end)
        .ok_or_else(|| CmrError::IoFailure("unexpected end of file".into()))?;
    *cursor = end;
    Ok(slice)
}

fn read_str(bytes: &[u8], cursor: &mut usize, len: usize) -> Result<String> {
    let slice = read_bytes(bytes, cursor, len)?;
    String::from_utf8(slice.to_vec())
        .map_err(|e| CmrError::IoFailure(format!("invalid attribute name: {e}")))
}
