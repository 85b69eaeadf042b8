//! Binary `.line` format: a geometry block followed by a topology block.
//!
//! Geometry: `u32 num_dims, u32 num_points, f64 point[num_points*num_dims],
//! attributes_section`. Topology: `u32 num_cells, (u32 a, u32 b)*num_cells`
//! (consecutive edges of the polyline). The attribute section is
//! `u16 num_attributes, { u16 name_len, char name[name_len], u8 type_tag,
//! u32 payload_len, byte payload[payload_len] }*`.

use super::{read_attributes, read_f64, read_u32, write_attributes};
use crate::centerline::Line3D;
use crate::error::{CmrError, Result};
use nalgebra::Vector3;

const NUM_DIMS: u32 = 3;

/// Encodes a line to the binary `.line` layout.
pub fn write_line(line: &Line3D) -> Vec<u8> {
    let mut buf = Vec::new();

    buf.extend_from_slice(&NUM_DIMS.to_le_bytes());
    buf.extend_from_slice(&(line.num_points() as u32).to_le_bytes());
    for p in line.points() {
        buf.extend_from_slice(&p.x.to_le_bytes());
        buf.extend_from_slice(&p.y.to_le_bytes());
        buf.extend_from_slice(&p.z.to_le_bytes());
    }
    write_attributes(&mut buf, line.attributes());

    let num_cells = line.num_points().saturating_sub(1) as u32;
    buf.extend_from_slice(&num_cells.to_le_bytes());
    for i in 0..num_cells {
        buf.extend_from_slice(&i.to_le_bytes());
        buf.extend_from_slice(&(i + 1).to_le_bytes());
    }

    buf
}

/// Decodes a line previously written by [`write_line`].
pub fn read_line(bytes: &[u8]) -> Result<Line3D> {
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

    let num_cells = read_u32(bytes, &mut cursor)? as usize;
    for _ in 0..num_cells {
        read_u32(bytes, &mut cursor)?;
        read_u32(bytes, &mut cursor)?;
    }

    Ok(Line3D::from_parts(points, attributes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{AttributeData, AttributeKind};

    #[test]
    fn roundtrips_points_and_radius_attribute() {
        let points = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(2.0, 0.0, 0.0),
        ];
        let mut attributes = crate::new_map();
        attributes.insert(
            AttributeKind::Radius.name().to_string(),
            AttributeData::Scalar(vec![1.0, 1.5, 2.0]),
        );
        let line = Line3D::from_parts(points.clone(), attributes);

        let bytes = write_line(&line);
        let decoded = read_line(&bytes).unwrap();

        assert_eq!(decoded.points(), points.as_slice());
        assert_eq!(decoded.radius().unwrap(), &[1.0, 1.5, 2.0]);
    }

    #[test]
    fn rejects_truncated_input() {
        let line = Line3D::from_parts(vec![Vector3::new(0.0, 0.0, 0.0)], crate::new_map());
        let mut bytes = write_line(&line);
        bytes.truncate(bytes.len() - 3);
        assert!(read_line(&bytes).is_err());
    }
}
