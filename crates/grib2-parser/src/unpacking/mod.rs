//! GRIB2 data unpacking.
//!
//! Simple packing (template 5.0) is decoded here. Complex, JPEG2000 and PNG
//! packings go through the `grib` crate.

use std::io::Cursor;

use crate::Grib2Error;

/// Unpack simple packed GRIB2 data.
///
/// `num_points` is the number of grid points. With a bitmap, only points whose
/// bit is set consume a packed value; the rest are `None`.
///
/// value = (R + X * 2^E) * 10^-D
pub fn unpack_simple(
    packed_data: &[u8],
    num_points: u32,
    bits_per_value: u8,
    reference_value: f32,
    binary_scale_factor: i16,
    decimal_scale_factor: i16,
    bitmap: Option<&[u8]>,
) -> Result<Vec<Option<f32>>, Grib2Error> {
    let binary_scale = 2.0_f64.powi(binary_scale_factor as i32);
    let decimal_scale = 10.0_f64.powi(-(decimal_scale_factor as i32));
    let reference = reference_value as f64;
    let bits_per_value = bits_per_value as usize;

    let mut values = Vec::with_capacity(num_points as usize);
    let mut bit_position = 0;

    for i in 0..(num_points as usize) {
        let present = match bitmap {
            Some(bm) => bm
                .get(i / 8)
                .map(|byte| (byte >> (7 - (i % 8))) & 1 == 1)
                .unwrap_or(false),
            None => true,
        };

        if !present {
            values.push(None);
            continue;
        }

        let packed = if bits_per_value == 0 {
            0
        } else {
            let raw = extract_bits(packed_data, bit_position, bits_per_value)
                .map_err(|e| Grib2Error::UnpackingError(format!("point {}: {}", i, e)))?;
            bit_position += bits_per_value;
            raw
        };

        let value = (reference + packed as f64 * binary_scale) * decimal_scale;
        values.push(Some(value as f32));
    }

    Ok(values)
}

/// Decode one complete message with the `grib` crate.
pub fn unpack_with_grib_crate(message: &[u8]) -> Result<Vec<f32>, Grib2Error> {
    let grib2 = grib::from_reader(Cursor::new(message))
        .map_err(|e| Grib2Error::UnpackingError(e.to_string()))?;

    let mut submessages = grib2.iter();
    let (_, submessage) = submessages
        .next()
        .ok_or_else(|| Grib2Error::UnpackingError("message has no submessages".to_string()))?;

    let decoder = grib::Grib2SubmessageDecoder::from(submessage)
        .map_err(|e| Grib2Error::UnpackingError(e.to_string()))?;
    let values: Vec<f32> = decoder
        .dispatch()
        .map_err(|e| Grib2Error::UnpackingError(e.to_string()))?
        .collect();

    Ok(values)
}

/// Extract `num_bits` bits starting at `start_bit` (MSB first).
fn extract_bits(data: &[u8], start_bit: usize, num_bits: usize) -> Result<u32, String> {
    if num_bits > 32 || num_bits == 0 {
        return Err(format!("Invalid number of bits: {}", num_bits));
    }

    let mut result = 0u32;
    for i in 0..num_bits {
        let absolute_bit = start_bit + i;
        let byte = data
            .get(absolute_bit / 8)
            .ok_or_else(|| "Not enough data to extract bits".to_string())?;
        let bit = (byte >> (7 - (absolute_bit % 8))) & 1;
        result = (result << 1) | (bit as u32);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bits() {
        let data = vec![0b10110101];
        assert_eq!(extract_bits(&data, 0, 2).unwrap(), 0b10);
        assert_eq!(extract_bits(&data, 2, 2).unwrap(), 0b11);
        assert_eq!(extract_bits(&data, 0, 8).unwrap(), 0b10110101);
        assert!(extract_bits(&data, 4, 8).is_err());
    }

    #[test]
    fn test_simple_unpacking_with_scales() {
        // R=100, E=1, D=1 -> (100 + X*2) / 10
        let packed = vec![0, 5];
        let values = unpack_simple(&packed, 2, 8, 100.0, 1, 1, None).unwrap();
        assert!((values[0].unwrap() - 10.0).abs() < 1e-5);
        assert!((values[1].unwrap() - 11.0).abs() < 1e-5);
    }

    #[test]
    fn test_bitmap_skips_missing_points() {
        // points 0 and 2 present, 1 missing; only two packed values
        let bitmap = [0b1010_0000];
        let packed = vec![7, 9];
        let values = unpack_simple(&packed, 3, 8, 0.0, 0, 0, Some(&bitmap)).unwrap();
        assert_eq!(values, vec![Some(7.0), None, Some(9.0)]);
    }

    #[test]
    fn test_zero_bits_is_constant_field() {
        let values = unpack_simple(&[], 4, 0, 288.15, 0, 0, None).unwrap();
        assert_eq!(values, vec![Some(288.15); 4]);
    }
}
