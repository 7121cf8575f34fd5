//! Generators for synthetic grids with predictable values.

use wx_common::{Axis, Coordinates, Grid};

/// Kelvin temperatures from 250 K (top-left) to 310 K (bottom-right).
pub fn create_temperature_values(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            let x = col as f32 / width.max(1) as f32;
            let y = row as f32 / height.max(1) as f32;
            data.push(250.0 + x * 30.0 + y * 30.0);
        }
    }
    data
}

/// Regular latitude/longitude coordinates: latitude descending from `north`
/// and longitude ascending from `west`, one degree apart.
pub fn regular_coordinates(ny: usize, nx: usize, north: f64, west: f64) -> Coordinates {
    Coordinates {
        latitude: (0..ny).map(|i| north - i as f64).collect(),
        longitude: (0..nx).map(|i| west + i as f64).collect(),
    }
}

/// A `(latitude, longitude)` grid with coordinates, filled with `value`.
pub fn constant_grid(name: &str, ny: usize, nx: usize, value: f32) -> Grid {
    lat_lon_grid(name, ny, nx, vec![value; ny * nx])
}

/// A `(latitude, longitude)` grid with coordinates over the given values.
pub fn lat_lon_grid(name: &str, ny: usize, nx: usize, data: Vec<f32>) -> Grid {
    let coordinates = regular_coordinates(ny, nx, 45.0, -100.0);
    let axes = vec![
        Axis::new("latitude", coordinates.latitude.clone()),
        Axis::new("longitude", coordinates.longitude.clone()),
    ];
    match Grid::new(name, axes, data) {
        Ok(grid) => grid.with_coordinates(coordinates),
        Err(e) => panic!("invalid test grid {}: {}", name, e),
    }
}

/// A 3-D `(level, latitude, longitude)` grid where each level is constant.
pub fn stacked_grid(name: &str, level_axis: &str, levels: &[(f64, f32)], ny: usize, nx: usize) -> Grid {
    let coordinates = regular_coordinates(ny, nx, 45.0, -100.0);
    let mut data = Vec::with_capacity(levels.len() * ny * nx);
    for (_, value) in levels {
        data.extend(std::iter::repeat(*value).take(ny * nx));
    }
    let axes = vec![
        Axis::new(level_axis, levels.iter().map(|(l, _)| *l).collect()),
        Axis::new("latitude", coordinates.latitude.clone()),
        Axis::new("longitude", coordinates.longitude.clone()),
    ];
    match Grid::new(name, axes, data) {
        Ok(grid) => grid.with_coordinates(coordinates),
        Err(e) => panic!("invalid test grid {}: {}", name, e),
    }
}
