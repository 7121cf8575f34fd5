//! Library of derived-field functions.
//!
//! Every function takes its inputs positionally, in the order of its
//! declared parameter names, and returns one grid on the shape of the first
//! input. NaN in any input propagates to the same cell of the result.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use wx_common::Grid;

use crate::error::FunctionError;

/// Signature shared by all library functions.
pub type DerivedFn = dyn Fn(&[&Grid]) -> Result<Grid, FunctionError> + Send + Sync;

/// A named function and its declared parameters.
#[derive(Clone)]
pub struct FunctionSpec {
    pub name: String,
    pub params: Vec<String>,
    /// Accepts trailing inputs beyond `params`.
    pub variadic: bool,
    func: Arc<DerivedFn>,
}

impl fmt::Debug for FunctionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSpec")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("variadic", &self.variadic)
            .finish()
    }
}

impl FunctionSpec {
    pub fn new<F>(name: &str, params: &[&str], func: F) -> Self
    where
        F: Fn(&[&Grid]) -> Result<Grid, FunctionError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            variadic: false,
            func: Arc::new(func),
        }
    }

    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    /// Check the arity, then call.
    pub fn call(&self, inputs: &[&Grid]) -> Result<Grid, FunctionError> {
        let expected = self.params.len();
        let arity_ok = if self.variadic {
            inputs.len() >= expected
        } else {
            inputs.len() == expected
        };
        if !arity_ok {
            return Err(FunctionError::Arity {
                function: self.name.clone(),
                expected,
                got: inputs.len(),
            });
        }
        (self.func)(inputs)
    }
}

/// Named functions available to derived fields.
#[derive(Debug, Clone, Default)]
pub struct FunctionLibrary {
    functions: BTreeMap<String, FunctionSpec>,
}

impl FunctionLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in functions.
    pub fn builtin() -> Self {
        let mut library = Self::new();
        library.register(
            FunctionSpec::new("identity", &["field"], |inputs| Ok(inputs[0].clone())).variadic(),
        );
        library.register(FunctionSpec::new("wind_speed", &["u_wind", "v_wind"], |i| {
            zip2("wind_speed", i[0], i[1], |u, v| u.hypot(v))
        }));
        library.register(FunctionSpec::new(
            "wind_direction",
            &["u_wind", "v_wind"],
            |i| zip2("wind_direction", i[0], i[1], wind_direction),
        ));
        library.register(FunctionSpec::new(
            "wind_shear_magnitude",
            &["u_component", "v_component"],
            |i| zip2("wind_shear_magnitude", i[0], i[1], |u, v| u.hypot(v)),
        ));
        library.register(FunctionSpec::new(
            "ventilation_rate",
            &["wind_speed", "boundary_layer_height"],
            |i| zip2("ventilation_rate", i[0], i[1], |s, h| s * h),
        ));
        library.register(FunctionSpec::new(
            "cross_totals",
            &["dewpoint_850", "temp_500"],
            |i| zip2("cross_totals", i[0], i[1], |td, t| td - t),
        ));
        library.register(FunctionSpec::new(
            "temperature_difference",
            &["temp_a", "temp_b"],
            |i| zip2("temperature_difference", i[0], i[1], |a, b| a - b),
        ));
        library.register(FunctionSpec::new(
            "lapse_rate",
            &["temp_lower", "temp_upper", "height_lower", "height_upper"],
            lapse_rate,
        ));
        library
    }

    /// Add or replace a function.
    pub fn register(&mut self, spec: FunctionSpec) {
        self.functions.insert(spec.name.clone(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&FunctionSpec> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }
}

/// Meteorological direction the wind blows from, degrees clockwise from north.
fn wind_direction(u: f32, v: f32) -> f32 {
    (270.0 - v.atan2(u).to_degrees()).rem_euclid(360.0)
}

/// Temperature drop per km between two surfaces with per-cell heights.
/// Cells with a non-positive thickness are NaN.
fn lapse_rate(inputs: &[&Grid]) -> Result<Grid, FunctionError> {
    let (t_low, t_high, z_low, z_high) = (inputs[0], inputs[1], inputs[2], inputs[3]);
    for other in [t_high, z_low, z_high] {
        check_shape(t_low, other)?;
    }

    let data = (0..t_low.data.len())
        .map(|i| {
            let thickness_km = (z_high.data[i] - z_low.data[i]) / 1000.0;
            if thickness_km > 0.0 {
                (t_low.data[i] - t_high.data[i]) / thickness_km
            } else {
                f32::NAN
            }
        })
        .collect();
    Ok(Grid::new("lapse_rate", t_low.axes.clone(), data)?)
}

fn check_shape(a: &Grid, b: &Grid) -> Result<(), FunctionError> {
    if a.shape() != b.shape() {
        return Err(FunctionError::ShapeMismatch {
            left: a.shape(),
            right: b.shape(),
        });
    }
    Ok(())
}

/// Element-wise combination of two equally shaped grids.
fn zip2(
    name: &str,
    a: &Grid,
    b: &Grid,
    f: impl Fn(f32, f32) -> f32,
) -> Result<Grid, FunctionError> {
    check_shape(a, b)?;
    let data = a.data.iter().zip(&b.data).map(|(x, y)| f(*x, *y)).collect();
    Ok(Grid::new(name, a.axes.clone(), data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{assert_approx_eq, constant_grid, lat_lon_grid};

    fn call(name: &str, inputs: &[&Grid]) -> Result<Grid, FunctionError> {
        FunctionLibrary::builtin().get(name).unwrap().call(inputs)
    }

    #[test]
    fn test_builtin_names() {
        assert_eq!(
            FunctionLibrary::builtin().names(),
            vec![
                "cross_totals",
                "identity",
                "lapse_rate",
                "temperature_difference",
                "ventilation_rate",
                "wind_direction",
                "wind_shear_magnitude",
                "wind_speed",
            ]
        );
    }

    #[test]
    fn test_wind_speed_and_nan_propagation() {
        let u = lat_lon_grid("u", 1, 2, vec![3.0, f32::NAN]);
        let v = lat_lon_grid("v", 1, 2, vec![4.0, 1.0]);
        let speed = call("wind_speed", &[&u, &v]).unwrap();
        assert_approx_eq!(speed.data[0], 5.0, 1e-6);
        assert!(speed.data[1].is_nan());
    }

    #[test]
    fn test_wind_direction_convention() {
        // From the west, from the north, from the east.
        let u = lat_lon_grid("u", 1, 3, vec![10.0, 0.0, -10.0]);
        let v = lat_lon_grid("v", 1, 3, vec![0.0, -10.0, 0.0]);
        let dir = call("wind_direction", &[&u, &v]).unwrap();
        assert_approx_eq!(dir.data[0], 270.0, 1e-4);
        assert_approx_eq!(dir.data[1], 0.0, 1e-4);
        assert_approx_eq!(dir.data[2], 90.0, 1e-4);
    }

    #[test]
    fn test_lapse_rate_per_km() {
        let t_low = constant_grid("t0", 2, 2, 25.0);
        let t_high = constant_grid("t3", 2, 2, 4.0);
        let z_low = constant_grid("z0", 2, 2, 0.0);
        let z_high = lat_lon_grid("z3", 2, 2, vec![3000.0, 3000.0, 3000.0, 0.0]);
        let rate = call("lapse_rate", &[&t_low, &t_high, &z_low, &z_high]).unwrap();
        assert_approx_eq!(rate.data[0], 7.0, 1e-5);
        assert!(rate.data[3].is_nan());
    }

    #[test]
    fn test_arity_and_shape_are_checked() {
        let a = constant_grid("a", 2, 2, 1.0);
        let b = constant_grid("b", 3, 2, 1.0);
        assert!(matches!(
            call("wind_speed", &[&a]),
            Err(FunctionError::Arity { expected: 2, got: 1, .. })
        ));
        assert!(matches!(
            call("cross_totals", &[&a, &b]),
            Err(FunctionError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_identity_takes_extra_inputs() {
        let a = constant_grid("a", 1, 1, 1.0);
        let b = constant_grid("b", 1, 1, 2.0);
        assert_eq!(call("identity", &[&a, &b]).unwrap().name, "a");
        assert!(call("identity", &[]).is_err());
    }
}
