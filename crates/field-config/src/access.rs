//! Named access patterns.
//!
//! A pattern is the base key/value bag used to open a container filtered to
//! one kind of record. Field definitions name a pattern and add the keys that
//! pin the record down (`level`, `paramId`, ...).

use serde_json::{json, Map, Value};

pub const PATTERN_NAMES: [&str; 10] = [
    "surface_instant",
    "surface_accum",
    "mean_sea_level",
    "atmosphere",
    "atmosphere_single_layer",
    "height_agl",
    "pressure_layer",
    "pressure_layer_max",
    "height_layer",
    "param_id",
];

/// Base access bag for a pattern name.
pub fn access_pattern(name: &str) -> Option<Map<String, Value>> {
    let bag = match name {
        "surface_instant" => json!({"typeOfLevel": "surface", "stepType": "instant"}),
        "surface_accum" => json!({"typeOfLevel": "surface", "stepType": "accum"}),
        "mean_sea_level" => json!({"typeOfLevel": "meanSea", "stepType": "instant"}),
        "atmosphere" => json!({"typeOfLevel": "atmosphere"}),
        "atmosphere_single_layer" => json!({"typeOfLevel": "entireAtmosphere"}),
        "height_agl" => json!({"typeOfLevel": "heightAboveGround"}),
        "pressure_layer" => {
            json!({"typeOfLevel": "pressureFromGroundLayer", "stepType": "instant"})
        }
        "pressure_layer_max" => {
            json!({"typeOfLevel": "pressureFromGroundLayer", "stepType": "max"})
        }
        "height_layer" => {
            json!({"typeOfLevel": "heightAboveGroundLayer", "stepType": "instant"})
        }
        "param_id" => json!({}),
        _ => return None,
    };

    match bag {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_pattern_resolves() {
        for name in PATTERN_NAMES {
            assert!(access_pattern(name).is_some(), "{}", name);
        }
        assert!(access_pattern("isobaric").is_none());
    }

    #[test]
    fn test_param_id_pattern_is_empty() {
        assert!(access_pattern("param_id").unwrap().is_empty());
        assert_eq!(
            access_pattern("pressure_layer_max").unwrap()["stepType"],
            "max"
        );
    }
}
