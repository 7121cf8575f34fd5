//! Field configuration: templates, access patterns and the field registry.
//!
//! A field definition is an untyped record that may name a parent template.
//! [`TemplateResolver`] flattens the chain into a typed
//! [`ResolvedFieldConfig`], and [`FieldRegistry`] loads, validates and caches
//! every definition found in the configuration store.

pub mod access;
pub mod definition;
pub mod error;
pub mod hash;
pub mod registry;
pub mod template;

pub use definition::{
    DerivedFieldConfig, Extend, FieldKind, LayerSelection, PlotStyle, RawDefinition,
    RawFieldConfig, ResolvedFieldConfig, Transform,
};
pub use error::{ConfigError, Result};
pub use registry::{FieldRegistry, FieldStore, RegistrySummary, RejectedField};
pub use template::TemplateResolver;
