//! Named unit and scale conversions.

use field_config::Transform;
use wx_common::Grid;

/// Convert one value.
pub fn transform_value(transform: Transform, value: f32) -> f32 {
    match transform {
        Transform::Abs => value.abs(),
        Transform::Celsius => value - 273.15,
        Transform::Mb => value / 100.0,
        Transform::SmokeConcentration => value * 1e9,
        Transform::SmokeColumn => value * 1e6,
        Transform::DustConcentration => value * 1e9,
        Transform::PrateUnits => value * 3600.0,
        Transform::HailSize => value * 1000.0,
    }
}

/// Apply `transform` to every value; NaN stays NaN.
pub fn apply_transform(mut grid: Grid, transform: Option<Transform>) -> Grid {
    if let Some(transform) = transform {
        grid.map_values(|v| transform_value(transform, v));
    }
    grid
}
