//! GRIB2 section parsing.
//!
//! Each function takes the complete message bytes (starting at "GRIB") and
//! locates its section by walking the section headers.

use crate::tables::Grib2Tables;
use crate::Grib2Error;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};

/// Scaled value marking a missing fixed surface.
const MISSING_U32: u32 = 0xFFFF_FFFF;

/// Section 0: Indicator Section (16 bytes)
#[derive(Debug, Clone)]
pub struct Indicator {
    pub edition: u8,
    pub discipline: u8,
    pub message_length: u64,
}

/// Section 1: Identification Section
#[derive(Debug, Clone)]
pub struct Identification {
    pub center: u16,
    pub sub_center: u16,
    pub table_version: u8,
    pub significance_of_reference_time: u8,
    pub reference_time: DateTime<Utc>,
}

/// Section 3: Grid Definition Section
#[derive(Debug, Clone)]
pub struct GridDefinition {
    pub template_number: u16,
    pub num_points: u32,
    /// Nj (rows)
    pub num_points_latitude: u32,
    /// Ni (columns)
    pub num_points_longitude: u32,
    /// Corner coordinates in degrees; only set for template 3.0.
    pub first_latitude: Option<f64>,
    pub first_longitude: Option<f64>,
    pub last_latitude: Option<f64>,
    pub last_longitude: Option<f64>,
    pub scanning_mode: u8,
}

impl GridDefinition {
    pub fn is_regular_lat_lon(&self) -> bool {
        self.template_number == 0 && self.first_latitude.is_some()
    }

    /// Latitude of each row, first grid point first.
    pub fn latitudes(&self) -> Option<Vec<f64>> {
        let (first, last) = (self.first_latitude?, self.last_latitude?);
        Some(linspace(first, last, self.num_points_latitude as usize))
    }

    /// Longitude of each column, unwrapped across the 0/360 seam.
    pub fn longitudes(&self) -> Option<Vec<f64>> {
        let first = self.first_longitude?;
        let mut last = self.last_longitude?;
        if last < first {
            last += 360.0;
        }
        Some(linspace(first, last, self.num_points_longitude as usize))
    }
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// A fixed surface from Section 4 (type plus scaled value).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedSurface {
    pub surface_type: u8,
    /// `None` when the scaled value is all ones (missing).
    pub value: Option<f64>,
}

impl FixedSurface {
    fn parse(bytes: &[u8]) -> Self {
        let surface_type = bytes[0];
        let scale = decode_grib2_signed_byte(bytes[1]);
        let raw = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        let value = if surface_type == 255 || raw == MISSING_U32 {
            None
        } else {
            Some(raw as f64 / 10f64.powi(scale as i32))
        };
        Self {
            surface_type,
            value,
        }
    }

    pub fn is_present(&self) -> bool {
        self.surface_type != 255
    }
}

/// Section 4: Product Definition Section
#[derive(Debug, Clone)]
pub struct ProductDefinition {
    pub template_number: u16,
    pub parameter_category: u8,
    pub parameter_number: u8,
    /// NCEP-style abbreviation, e.g. `TMP`, `MXUPHL`.
    pub parameter_short_name: String,
    pub first_surface: FixedSurface,
    pub second_surface: FixedSurface,
    pub level_description: String,
    pub forecast_hour: u32,
    /// Statistical process (Code Table 4.10) for template 4.8.
    pub statistical_process: Option<u8>,
}

/// Section 5: Data Representation Section
#[derive(Debug, Clone)]
pub struct DataRepresentation {
    pub num_data_points: u32,
    pub template_number: u16,
    pub reference_value: f32,
    pub binary_scale_factor: i16,
    pub decimal_scale_factor: i16,
    pub bits_per_value: u8,
}

/// Section 6: Bitmap Section
#[derive(Debug, Clone)]
pub struct Bitmap {
    pub indicator: u8,
    pub data: Bytes,
}

/// Section 7: Data Section
#[derive(Debug, Clone)]
pub struct DataSection {
    pub data: Bytes,
}

/// Decode a 4-byte GRIB2 sign-magnitude integer (MSB is the sign bit).
///
/// Returns 0 for slices that are not exactly 4 bytes.
pub fn decode_grib2_signed(bytes: &[u8]) -> i32 {
    if bytes.len() != 4 {
        return 0;
    }
    let raw = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let magnitude = (raw & 0x7FFF_FFFF) as i32;
    if raw & 0x8000_0000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

fn decode_grib2_signed_byte(byte: u8) -> i8 {
    let magnitude = (byte & 0x7F) as i8;
    if byte & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

fn decode_grib2_signed_i16(bytes: [u8; 2]) -> i16 {
    let raw = u16::from_be_bytes(bytes);
    let magnitude = (raw & 0x7FFF) as i16;
    if raw & 0x8000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

fn be_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

// ===== Parsing Functions =====

/// Parse Section 0 (Indicator) from start of message
pub fn parse_indicator(data: &[u8]) -> Result<Indicator, Grib2Error> {
    if data.len() < 16 {
        return Err(Grib2Error::InvalidFormat(
            "Not enough data for indicator section".to_string(),
        ));
    }

    if &data[0..4] != b"GRIB" {
        return Err(Grib2Error::InvalidFormat(
            "Invalid GRIB magic bytes".to_string(),
        ));
    }

    // Octet 7 discipline, octet 8 edition, octets 9-16 total length
    let discipline = data[6];
    let edition = data[7];
    if edition != 2 {
        return Err(Grib2Error::InvalidFormat(format!(
            "Expected GRIB edition 2, got {}",
            edition
        )));
    }

    let mut length = [0u8; 8];
    length.copy_from_slice(&data[8..16]);

    Ok(Indicator {
        edition,
        discipline,
        message_length: u64::from_be_bytes(length),
    })
}

/// Parse Section 1 (Identification)
pub fn parse_identification(data: &[u8]) -> Result<Identification, Grib2Error> {
    let offset = find_section(data, 1)?;
    let sec = &data[offset..];

    if sec.len() < 19 {
        return Err(Grib2Error::InvalidSection {
            section: 1,
            reason: "Not enough data".to_string(),
        });
    }

    let center = u16::from_be_bytes([sec[5], sec[6]]);
    let sub_center = u16::from_be_bytes([sec[7], sec[8]]);
    let table_version = sec[9];
    let significance_of_reference_time = sec[11];

    let year = u16::from_be_bytes([sec[12], sec[13]]);
    let (month, day, hour, minute, second) = (sec[14], sec[15], sec[16], sec[17], sec[18]);

    let reference_time = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .and_then(|date| date.and_hms_opt(hour as u32, minute as u32, second as u32))
        .ok_or_else(|| Grib2Error::InvalidSection {
            section: 1,
            reason: format!(
                "Invalid date: {}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            ),
        })?;

    Ok(Identification {
        center,
        sub_center,
        table_version,
        significance_of_reference_time,
        reference_time: DateTime::<Utc>::from_naive_utc_and_offset(reference_time, Utc),
    })
}

/// Parse Section 3 (Grid Definition)
pub fn parse_grid_definition(data: &[u8]) -> Result<GridDefinition, Grib2Error> {
    let offset = find_section(data, 3)?;
    let sec = &data[offset..];

    if sec.len() < 38 {
        return Err(Grib2Error::InvalidSection {
            section: 3,
            reason: "Not enough data".to_string(),
        });
    }

    let num_points = be_u32(sec, 6);
    let template_number = u16::from_be_bytes([sec[12], sec[13]]);

    // Template data starts at octet 15. Ni/Nj (or Nx/Ny) sit at the same
    // offsets for lat/lon (3.0), Lambert (3.30) and polar stereographic (3.20).
    let gd = &sec[14..];
    let ni = be_u32(gd, 16);
    let nj = be_u32(gd, 20);

    let mut grid = GridDefinition {
        template_number,
        num_points,
        num_points_latitude: nj,
        num_points_longitude: ni,
        first_latitude: None,
        first_longitude: None,
        last_latitude: None,
        last_longitude: None,
        scanning_mode: 0,
    };

    if template_number == 0 {
        if gd.len() < 58 {
            return Err(Grib2Error::InvalidSection {
                section: 3,
                reason: format!("Template 3.0 needs at least 58 bytes, got {}", gd.len()),
            });
        }
        // Corner points are sign-magnitude microdegrees
        let micro = |at: usize| decode_grib2_signed(&gd[at..at + 4]) as f64 / 1e6;
        grid.first_latitude = Some(micro(32));
        grid.first_longitude = Some(micro(36));
        grid.last_latitude = Some(micro(41));
        grid.last_longitude = Some(micro(45));
        grid.scanning_mode = gd[57];
    }

    Ok(grid)
}

/// Parse Section 4 (Product Definition)
pub fn parse_product_definition(
    data: &[u8],
    discipline: u8,
    tables: &Grib2Tables,
) -> Result<ProductDefinition, Grib2Error> {
    let offset = find_section(data, 4)?;
    let sec = &data[offset..];

    if sec.len() < 34 {
        return Err(Grib2Error::InvalidSection {
            section: 4,
            reason: "Not enough data".to_string(),
        });
    }

    let template_number = u16::from_be_bytes([sec[7], sec[8]]);
    match template_number {
        0 | 1 | 8 | 11 => {}
        other => {
            return Err(Grib2Error::InvalidSection {
                section: 4,
                reason: format!("Unsupported product template 4.{}", other),
            })
        }
    }

    let parameter_category = sec[9];
    let parameter_number = sec[10];

    // Octet 18 unit of time range, octets 19-22 forecast time
    let unit = sec[17];
    let forecast_time = be_u32(sec, 18);
    let forecast_hour = match unit {
        0 => forecast_time / 60,
        2 => forecast_time * 24,
        _ => forecast_time,
    };

    let first_surface = FixedSurface::parse(&sec[22..28]);
    let second_surface = FixedSurface::parse(&sec[28..34]);

    // Template 4.8: the first time-range loop starts after the end-of-interval
    // timestamp (7 bytes), range count and missing count.
    let statistical_process = match template_number {
        8 => sec.get(46).copied(),
        11 => sec.get(49).copied(),
        _ => None,
    };

    let parameter_short_name = tables
        .lookup_parameter(discipline, parameter_category, parameter_number)
        .map(str::to_string)
        .unwrap_or_else(|| builtin_short_name(discipline, parameter_category, parameter_number));

    let level_value = first_surface.value.unwrap_or(0.0);
    let level_description = tables
        .lookup_level(first_surface.surface_type, level_value)
        .unwrap_or_else(|| builtin_level_description(first_surface.surface_type, level_value));

    Ok(ProductDefinition {
        template_number,
        parameter_category,
        parameter_number,
        parameter_short_name,
        first_surface,
        second_surface,
        level_description,
        forecast_hour,
        statistical_process,
    })
}

/// Parse Section 5 (Data Representation)
pub fn parse_data_representation(data: &[u8]) -> Result<DataRepresentation, Grib2Error> {
    let offset = find_section(data, 5)?;
    let sec = &data[offset..];

    if sec.len() < 21 {
        return Err(Grib2Error::InvalidSection {
            section: 5,
            reason: "Not enough data".to_string(),
        });
    }

    // Octets 12-21 share one layout across templates 5.0, 5.2, 5.3, 5.40 and 5.41
    Ok(DataRepresentation {
        num_data_points: be_u32(sec, 5),
        template_number: u16::from_be_bytes([sec[9], sec[10]]),
        reference_value: f32::from_be_bytes([sec[11], sec[12], sec[13], sec[14]]),
        binary_scale_factor: decode_grib2_signed_i16([sec[15], sec[16]]),
        decimal_scale_factor: decode_grib2_signed_i16([sec[17], sec[18]]),
        bits_per_value: sec[19],
    })
}

/// Parse Section 6 (Bitmap). `None` when no bitmap applies.
pub fn parse_bitmap(data: &[u8]) -> Result<Option<Bitmap>, Grib2Error> {
    let offset = find_section(data, 6)?;
    let sec = &data[offset..];

    if sec.len() < 6 {
        return Err(Grib2Error::InvalidSection {
            section: 6,
            reason: "Not enough data".to_string(),
        });
    }

    let indicator = sec[5];

    match indicator {
        255 => Ok(None),
        0 => Ok(Some(Bitmap {
            indicator,
            data: Bytes::copy_from_slice(section_body(sec, 6, 6)?),
        })),
        other => Err(Grib2Error::InvalidSection {
            section: 6,
            reason: format!("Unsupported bitmap indicator {}", other),
        }),
    }
}

/// Parse Section 7 (Data)
pub fn parse_data_section(data: &[u8]) -> Result<DataSection, Grib2Error> {
    let offset = find_section(data, 7)?;
    let sec = &data[offset..];

    Ok(DataSection {
        data: Bytes::copy_from_slice(section_body(sec, 7, 5)?),
    })
}

// ===== Helper Functions =====

/// Bytes of a section from `start` up to its declared length.
fn section_body(sec: &[u8], section: u8, start: usize) -> Result<&[u8], Grib2Error> {
    if sec.len() < 4 {
        return Err(Grib2Error::InvalidSection {
            section,
            reason: "Not enough data".to_string(),
        });
    }
    let section_length = be_u32(sec, 0) as usize;
    if section_length < start || section_length > sec.len() {
        return Err(Grib2Error::InvalidSection {
            section,
            reason: format!("Invalid section length {}", section_length),
        });
    }
    Ok(&sec[start..section_length])
}

/// Find a section by number within a message
fn find_section(data: &[u8], section_num: u8) -> Result<usize, Grib2Error> {
    let mut offset = 16; // After Section 0

    loop {
        if offset + 4 <= data.len() && &data[offset..offset + 4] == b"7777" {
            return Err(Grib2Error::InvalidSection {
                section: section_num,
                reason: "Reached end of message without finding section".to_string(),
            });
        }

        if offset + 5 > data.len() {
            return Err(Grib2Error::InvalidSection {
                section: section_num,
                reason: "Section not found".to_string(),
            });
        }

        let section_length = be_u32(data, offset) as usize;
        if section_length < 5 || offset + section_length > data.len() {
            return Err(Grib2Error::InvalidSection {
                section: section_num,
                reason: "Invalid section length".to_string(),
            });
        }

        if data[offset + 4] == section_num {
            return Ok(offset);
        }

        offset += section_length;
    }
}

/// NCEP abbreviation for a parameter, `P{d}_{c}_{n}` when unknown.
pub fn builtin_short_name(discipline: u8, category: u8, number: u8) -> String {
    let name = match (discipline, category, number) {
        // Temperature
        (0, 0, 0) => "TMP",
        (0, 0, 2) => "POT",
        (0, 0, 6) => "DPT",
        // Moisture
        (0, 1, 0) => "SPFH",
        (0, 1, 1) => "RH",
        (0, 1, 3) => "PWAT",
        (0, 1, 7) => "PRATE",
        (0, 1, 8) => "APCP",
        // Momentum
        (0, 2, 0) => "WDIR",
        (0, 2, 1) => "WIND",
        (0, 2, 2) => "UGRD",
        (0, 2, 3) => "VGRD",
        (0, 2, 8) => "VVEL",
        (0, 2, 22) => "GUST",
        (0, 2, 27) => "VUCSH",
        (0, 2, 28) => "VVCSH",
        (0, 2, 194) => "USTM",
        (0, 2, 195) => "VSTM",
        // Mass
        (0, 3, 0) => "PRES",
        (0, 3, 1) => "PRMSL",
        (0, 3, 5) => "HGT",
        (0, 3, 18) => "HPBL",
        (0, 3, 196) => "HPBL",
        (0, 3, 198) => "MSLMA",
        // Cloud
        (0, 6, 1) => "TCDC",
        // Stability
        (0, 7, 6) => "CAPE",
        (0, 7, 7) => "CIN",
        (0, 7, 8) => "HLCY",
        (0, 7, 192) => "LFTX",
        (0, 7, 193) => "4LFTX",
        (0, 7, 199) => "MXUPHL",
        // Aerosols
        (0, 20, 0) => "MASSDEN",
        (0, 20, 1) => "COLMD",
        // Radar
        (0, 16, 195) => "REFD",
        (0, 16, 196) => "REFC",
        (0, 16, 197) => "RETOP",
        // Physical properties
        (0, 19, 0) => "VIS",
        (0, 17, 192) => "LTNG",
        _ => return format!("P{}_{}_{}", discipline, category, number),
    };
    name.to_string()
}

/// Human-readable parameter name, if known.
pub fn builtin_long_name(discipline: u8, category: u8, number: u8) -> Option<&'static str> {
    let name = match (discipline, category, number) {
        (0, 0, 0) => "Temperature",
        (0, 0, 6) => "Dew point temperature",
        (0, 1, 1) => "Relative humidity",
        (0, 1, 3) => "Precipitable water",
        (0, 1, 7) => "Precipitation rate",
        (0, 1, 8) => "Total precipitation",
        (0, 2, 2) => "U component of wind",
        (0, 2, 3) => "V component of wind",
        (0, 2, 22) => "Wind speed (gust)",
        (0, 3, 0) => "Pressure",
        (0, 3, 1) => "Pressure reduced to MSL",
        (0, 3, 5) => "Geopotential height",
        (0, 7, 6) => "Convective available potential energy",
        (0, 7, 7) => "Convective inhibition",
        (0, 7, 8) => "Storm relative helicity",
        (0, 7, 199) => "Hourly maximum of upward vertical helicity",
        (0, 16, 196) => "Composite reflectivity",
        (0, 19, 0) => "Visibility",
        _ => return None,
    };
    Some(name)
}

/// Level description, `Level type {t} value {v}` when unknown.
pub fn builtin_level_description(level_type: u8, level_value: f64) -> String {
    match level_type {
        1 => "surface".to_string(),
        2 => "cloud base".to_string(),
        3 => "cloud top".to_string(),
        4 => "0C isotherm".to_string(),
        7 => "tropopause".to_string(),
        10 => "entire atmosphere".to_string(),
        100 => format!("{} mb", level_value / 100.0),
        101 => "mean sea level".to_string(),
        103 => format!("{} m above ground", level_value),
        108 => format!("{} mb above ground", level_value / 100.0),
        200 => "entire atmosphere (single layer)".to_string(),
        220 => "planetary boundary layer".to_string(),
        _ => format!("Level type {} value {}", level_type, level_value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Section 0 placeholder followed by `sections`.
    fn message(sections: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; 16];
        data.extend_from_slice(sections);
        data
    }

    #[test]
    fn test_short_bitmap_section_is_an_error() {
        // Section 6 claims 5 bytes but sets indicator 0 in the next byte.
        let data = message(&[0, 0, 0, 5, 6, 0, 0, 0]);
        let err = parse_bitmap(&data).unwrap_err();
        assert!(matches!(err, Grib2Error::InvalidSection { section: 6, .. }));
    }

    #[test]
    fn test_section_body_bounds() {
        let sec = [0, 0, 0, 8, 7, 1, 2, 3];
        assert_eq!(section_body(&sec, 7, 5).unwrap(), &[1, 2, 3]);
        assert!(section_body(&sec[..6], 7, 5).is_err());
        assert!(section_body(&[0, 0, 0, 4, 7], 7, 5).is_err());
        assert!(section_body(&[0, 0], 7, 5).is_err());

        let data = message(&[0, 0, 0, 5, 7]);
        assert!(parse_data_section(&data).unwrap().data.is_empty());
    }

    #[test]
    fn test_signed_byte_and_short() {
        assert_eq!(decode_grib2_signed_byte(0x02), 2);
        assert_eq!(decode_grib2_signed_byte(0x82), -2);
        assert_eq!(decode_grib2_signed_i16([0x80, 0x05]), -5);
        assert_eq!(decode_grib2_signed_i16([0x00, 0x05]), 5);
    }

    #[test]
    fn test_fixed_surface_scaling() {
        // 18000 Pa with scale 0
        let surface = FixedSurface::parse(&[108, 0, 0, 0, 0x46, 0x50]);
        assert_eq!(surface.value, Some(18000.0));

        // 25 scaled by 10^1
        let surface = FixedSurface::parse(&[103, 1, 0, 0, 0, 25]);
        assert_eq!(surface.value, Some(2.5));

        let missing = FixedSurface::parse(&[255, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(!missing.is_present());
        assert_eq!(missing.value, None);
    }

    #[test]
    fn test_linspace_longitudes_unwrap() {
        let grid = GridDefinition {
            template_number: 0,
            num_points: 9,
            num_points_latitude: 3,
            num_points_longitude: 3,
            first_latitude: Some(50.0),
            first_longitude: Some(359.0),
            last_latitude: Some(48.0),
            last_longitude: Some(1.0),
            scanning_mode: 0,
        };
        assert_eq!(grid.latitudes(), Some(vec![50.0, 49.0, 48.0]));
        assert_eq!(grid.longitudes(), Some(vec![359.0, 360.0, 361.0]));
    }

    #[test]
    fn test_builtin_names() {
        assert_eq!(builtin_short_name(0, 7, 199), "MXUPHL");
        assert_eq!(builtin_short_name(0, 99, 1), "P0_99_1");
        assert_eq!(builtin_level_description(103, 2.0), "2 m above ground");
        assert_eq!(builtin_level_description(100, 50000.0), "500 mb");
    }
}
