//! Gridded numeric data with named axes.
//!
//! A [`Grid`] is an N-dimensional array stored in row-major order. The last
//! two axes are spatial once the grid is ready for rendering; anything in
//! front of them (vertical levels, layers, time) is reduced away by the
//! extraction pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{WxError, WxResult};

/// Axis names treated as spatial.
pub const SPATIAL_AXES: [&str; 4] = ["latitude", "longitude", "y", "x"];

/// A named axis with one coordinate value per index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub name: String,
    pub values: Vec<f64>,
}

impl Axis {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Axis whose coordinate values are just the indices `0..len`.
    pub fn indexed(name: impl Into<String>, len: usize) -> Self {
        Self::new(name, (0..len).map(|i| i as f64).collect())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_spatial(&self) -> bool {
        SPATIAL_AXES.contains(&self.name.as_str())
    }

    /// Index of a coordinate value equal to `value`.
    pub fn position(&self, value: f64) -> Option<usize> {
        self.values.iter().position(|v| (v - value).abs() < 1e-9)
    }

    /// Index of the coordinate value closest to `target`.
    pub fn closest_index(&self, target: f64) -> Option<usize> {
        self.values
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                (*a - target)
                    .abs()
                    .partial_cmp(&(*b - target).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(i, _)| i)
    }
}

/// One-dimensional latitude/longitude coordinates of a regular grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: Vec<f64>,
    pub longitude: Vec<f64>,
}

/// Gridded values plus coordinates and a metadata bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub name: String,
    pub axes: Vec<Axis>,
    pub data: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub attrs: BTreeMap<String, Value>,
    /// Named input grids carried by composite fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<BTreeMap<String, Grid>>,
}

impl Grid {
    /// Build a grid, checking that the axes describe exactly `data.len()` values.
    pub fn new(name: impl Into<String>, axes: Vec<Axis>, data: Vec<f32>) -> WxResult<Self> {
        let expected: usize = axes.iter().map(Axis::len).product();
        if expected != data.len() {
            return Err(WxError::ShapeMismatch {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            name: name.into(),
            axes,
            data,
            coordinates: None,
            attrs: BTreeMap::new(),
            components: None,
        })
    }

    /// Build a plain 2-D grid with indexed `y`/`x` axes.
    pub fn spatial(name: impl Into<String>, ny: usize, nx: usize, data: Vec<f32>) -> WxResult<Self> {
        Self::new(name, vec![Axis::indexed("y", ny), Axis::indexed("x", nx)], data)
    }

    pub fn with_coordinates(mut self, coordinates: Coordinates) -> Self {
        self.coordinates = Some(coordinates);
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attrs.insert(key.into(), value.into());
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(Value::as_str)
    }

    pub fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(Axis::len).collect()
    }

    pub fn ndim(&self) -> usize {
        self.axes.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn axis(&self, name: &str) -> Option<&Axis> {
        self.axes.iter().find(|a| a.name == name)
    }

    pub fn axis_names(&self) -> Vec<&str> {
        self.axes.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn has_coordinates(&self) -> bool {
        self.coordinates.is_some()
    }

    pub fn is_composite(&self) -> bool {
        self.components.is_some()
    }

    /// First axis that is not one of the spatial axes.
    pub fn first_non_spatial_axis(&self) -> Option<&str> {
        self.axes
            .iter()
            .find(|a| !a.is_spatial())
            .map(|a| a.name.as_str())
    }

    /// (rows, cols) of the trailing two axes.
    pub fn spatial_shape(&self) -> Option<(usize, usize)> {
        let n = self.axes.len();
        if n < 2 {
            return None;
        }
        Some((self.axes[n - 2].len(), self.axes[n - 1].len()))
    }

    /// Select one index along `axis`, dropping that axis from the result.
    pub fn select(&self, axis: &str, index: usize) -> WxResult<Grid> {
        let position = self
            .axes
            .iter()
            .position(|a| a.name == axis)
            .ok_or_else(|| WxError::AxisNotFound(axis.to_string()))?;

        let len = self.axes[position].len();
        if index >= len {
            return Err(WxError::IndexOutOfRange {
                axis: axis.to_string(),
                index,
                len,
            });
        }

        let outer: usize = self.axes[..position].iter().map(Axis::len).product();
        let inner: usize = self.axes[position + 1..].iter().map(Axis::len).product();

        let mut data = Vec::with_capacity(outer * inner);
        for o in 0..outer {
            let start = (o * len + index) * inner;
            data.extend_from_slice(&self.data[start..start + inner]);
        }

        let mut axes = self.axes.clone();
        let removed = axes.remove(position);

        let mut selected = Grid {
            name: self.name.clone(),
            axes,
            data,
            coordinates: self.coordinates.clone(),
            attrs: self.attrs.clone(),
            components: self.components.clone(),
        };
        selected.set_attr(removed.name, removed.values[index]);
        Ok(selected)
    }

    /// Value at (row, col) of a 2-D grid.
    pub fn value_at(&self, row: usize, col: usize) -> Option<f32> {
        if self.ndim() != 2 {
            return None;
        }
        let (ny, nx) = self.spatial_shape()?;
        if row >= ny || col >= nx {
            return None;
        }
        self.data.get(row * nx + col).copied()
    }

    pub fn map_values(&mut self, f: impl Fn(f32) -> f32) {
        for v in self.data.iter_mut() {
            *v = f(*v);
        }
    }

    /// Minimum and maximum finite values.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        self.data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}
