//! ecCodes-style product keys.
//!
//! Field configurations address records the way ecCodes does (`typeOfLevel`,
//! `stepType`, `shortName`, `paramId`). These helpers derive those keys from
//! the raw Section 4 codes.

use crate::sections::FixedSurface;

/// `typeOfLevel` for a pair of fixed surfaces.
pub fn type_of_level(first: &FixedSurface, second: &FixedSurface) -> &'static str {
    match (first.surface_type, second.surface_type) {
        (1, 8) => "entireAtmosphere",
        (1, _) => "surface",
        (2, _) => "cloudBase",
        (3, _) => "cloudTop",
        (4, _) => "isothermZero",
        (6, _) => "maxWind",
        (7, _) => "tropopause",
        (8, _) => "nominalTop",
        (10, _) => "atmosphere",
        (100, 100) => "isobaricLayer",
        (100, _) => "isobaricInhPa",
        (101, _) => "meanSea",
        (102, _) => "heightAboveSea",
        (103, 103) => "heightAboveGroundLayer",
        (103, _) => "heightAboveGround",
        (104, _) => "sigma",
        (105, _) => "hybrid",
        (106, 106) => "depthBelowLandLayer",
        (106, _) => "depthBelowLand",
        (108, _) => "pressureFromGroundLayer",
        (200, _) => "atmosphereSingleLayer",
        (220, _) => "planetaryBoundaryLayer",
        _ => "unknown",
    }
}

/// `level` as ecCodes reports it: hPa for isobaric surfaces, and the top
/// (first surface) of a layer.
pub fn level(first: &FixedSurface) -> f64 {
    let value = first.value.unwrap_or(0.0);
    match first.surface_type {
        100 | 108 => value / 100.0,
        _ => value,
    }
}

/// `stepType` from the product template and statistical process.
pub fn step_type(template_number: u16, statistical_process: Option<u8>) -> &'static str {
    match (template_number, statistical_process) {
        (8 | 11, Some(0)) => "avg",
        (8 | 11, Some(1)) => "accum",
        (8 | 11, Some(2)) => "max",
        (8 | 11, Some(3)) => "min",
        (8 | 11, Some(4)) => "diff",
        (8 | 11, _) => "unknown",
        _ => "instant",
    }
}

/// ecCodes `shortName` for the records the pipeline reads by name.
///
/// Records that ecCodes has no name for come back as `None`; the container
/// layer files them under `unknown` with the NCEP abbreviation attached.
pub fn short_name(
    discipline: u8,
    category: u8,
    number: u8,
    first: &FixedSurface,
) -> Option<&'static str> {
    let height = match first.surface_type {
        103 => first.value,
        _ => None,
    };

    let name = match (discipline, category, number, height) {
        (0, 0, 0, Some(h)) if h == 2.0 => "t2m",
        (0, 0, 6, Some(h)) if h == 2.0 => "d2m",
        (0, 1, 1, Some(h)) if h == 2.0 => "r2",
        (0, 2, 2, Some(h)) if h == 10.0 => "u10",
        (0, 2, 3, Some(h)) if h == 10.0 => "v10",
        (0, 0, 0, _) => "t",
        (0, 0, 6, _) => "dpt",
        (0, 1, 1, _) => "r",
        (0, 1, 3, _) => "pwat",
        (0, 1, 7, _) => "prate",
        (0, 1, 8, _) => "tp",
        (0, 2, 2, _) => "u",
        (0, 2, 3, _) => "v",
        (0, 2, 22, _) => "gust",
        (0, 2, 27, _) => "vucsh",
        (0, 2, 28, _) => "vvcsh",
        (0, 3, 0, _) if first.surface_type == 1 => "sp",
        (0, 3, 0, _) => "pres",
        (0, 3, 1, _) => "prmsl",
        (0, 3, 5, _) => "gh",
        (0, 3, 18, _) | (0, 3, 196, _) => "blh",
        (0, 3, 198, _) => "mslma",
        (0, 6, 1, _) => "tcc",
        (0, 7, 6, _) => "cape",
        (0, 7, 7, _) => "cin",
        (0, 7, 8, _) => "hlcy",
        (0, 7, 193, _) => "lftx4",
        (0, 16, 195, _) => "refd",
        (0, 16, 196, _) => "refc",
        (0, 17, 192, _) => "ltng",
        (0, 19, 0, _) => "vis",
        (0, 20, 0, _) => "mdens",
        (0, 20, 1, _) => "colmd",
        _ => return None,
    };
    Some(name)
}

/// ecCodes `paramId`, where the pipeline relies on one.
pub fn param_id(discipline: u8, category: u8, number: u8, first: &FixedSurface) -> Option<u32> {
    let height = match first.surface_type {
        103 => first.value,
        _ => None,
    };

    let id = match (discipline, category, number, height) {
        (0, 0, 0, Some(h)) if h == 2.0 => 167,
        (0, 0, 6, Some(h)) if h == 2.0 => 168,
        (0, 1, 1, Some(h)) if h == 2.0 => 260242,
        (0, 2, 2, Some(h)) if h == 10.0 => 165,
        (0, 2, 3, Some(h)) if h == 10.0 => 166,
        (0, 0, 0, _) => 130,
        (0, 1, 1, _) => 157,
        (0, 2, 2, _) => 131,
        (0, 2, 3, _) => 132,
        (0, 3, 1, _) => 260074,
        (0, 3, 5, _) => 156,
        (0, 7, 6, _) => 59,
        (0, 7, 7, _) => 228001,
        _ => return None,
    };
    Some(id)
}
