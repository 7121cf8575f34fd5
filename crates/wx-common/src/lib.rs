//! Common types shared across the weather-fields crates.

pub mod error;
pub mod grid;
pub mod run;

pub use error::{WxError, WxResult};
pub use grid::{Axis, Coordinates, Grid};
pub use run::{RunKey, StepKey};
