//! Shared test utilities for the weather-fields workspace.
//!
//! - Synthetic GRIB2 messages ([`Grib2Builder`])
//! - Grid generators
//! - Field and model configuration fixtures
//! - `assert_approx_eq!`
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```

pub mod fixtures;
pub mod generators;
pub mod grib2;

pub use fixtures::*;
pub use generators::*;
pub use grib2::*;

/// Approximate floating-point equality.
///
/// ```ignore
/// assert_approx_eq!(grid.value_at(0, 0).unwrap(), 26.85, 1e-4);
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if !(diff <= epsilon) {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}
