//! Derived weather fields.
//!
//! A derived field is computed from other fields, raw or derived, by a
//! named function from the [`FunctionLibrary`]. Composite fields skip the
//! function and hand every input to the renderer at once.

pub mod engine;
pub mod error;
pub mod functions;

pub use engine::{ContainerSet, DerivedEngine, RawLoader};
pub use error::{DerivedError, FunctionError, Result};
pub use functions::{DerivedFn, FunctionLibrary, FunctionSpec};
