//! Derived field computation.
//!
//! Inputs are resolved through the registry in declared order. Raw inputs
//! load through a [`RawLoader`]; derived inputs recurse with the chain of
//! ancestors carried explicitly, so a recipe that refers back to itself is a
//! configuration error instead of unbounded recursion.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use extraction::RawExtractor;
use field_config::{ConfigError, FieldRegistry, ResolvedFieldConfig};
use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use tracing::{debug, instrument};
use wx_common::Grid;

use crate::error::{DerivedError, Result};
use crate::functions::FunctionLibrary;

/// Loads one raw field from a container.
#[async_trait]
pub trait RawLoader: Send + Sync {
    async fn load_raw(
        &self,
        container: &Path,
        config: &ResolvedFieldConfig,
    ) -> extraction::Result<Grid>;
}

#[async_trait]
impl RawLoader for RawExtractor {
    async fn load_raw(
        &self,
        container: &Path,
        config: &ResolvedFieldConfig,
    ) -> extraction::Result<Grid> {
        self.extract(container, config).await
    }
}

/// The containers of one step, keyed by file category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSet {
    primary: String,
    files: BTreeMap<String, PathBuf>,
}

impl ContainerSet {
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            files: BTreeMap::new(),
        }
    }

    pub fn with_file(mut self, category: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.insert(category, path);
        self
    }

    pub fn insert(&mut self, category: impl Into<String>, path: impl Into<PathBuf>) {
        self.files.insert(category.into(), path.into());
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn get(&self, category: &str) -> Option<&Path> {
        self.files.get(category).map(PathBuf::as_path)
    }

    pub fn primary_path(&self) -> Option<&Path> {
        self.get(&self.primary)
    }

    /// The preferred category's container, else the primary one.
    pub fn select(&self, preferred: Option<&str>) -> Option<&Path> {
        preferred
            .and_then(|category| self.get(category))
            .or_else(|| self.primary_path())
    }

    pub fn categories(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_path()))
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Computes derived fields from their inputs.
#[derive(Clone)]
pub struct DerivedEngine {
    registry: Arc<FieldRegistry>,
    loader: Arc<dyn RawLoader>,
    functions: Arc<FunctionLibrary>,
    /// Field category to preferred file category.
    category_file_types: BTreeMap<String, String>,
}

impl DerivedEngine {
    pub fn new(registry: Arc<FieldRegistry>, loader: Arc<dyn RawLoader>) -> Self {
        Self {
            registry,
            loader,
            functions: Arc::new(FunctionLibrary::builtin()),
            category_file_types: BTreeMap::from([("smoke".to_string(), "surface".to_string())]),
        }
    }

    pub fn with_functions(mut self, functions: FunctionLibrary) -> Self {
        self.functions = Arc::new(functions);
        self
    }

    /// Replace the field-category to file-category preferences.
    pub fn with_category_file_types(mut self, map: BTreeMap<String, String>) -> Self {
        self.category_file_types = map;
        self
    }

    pub fn functions(&self) -> &FunctionLibrary {
        &self.functions
    }

    /// Container a raw field of `config` should be read from.
    pub fn container_for<'a>(
        &self,
        config: &ResolvedFieldConfig,
        containers: &'a ContainerSet,
    ) -> Option<&'a Path> {
        let preferred = config
            .category
            .as_deref()
            .and_then(|c| self.category_file_types.get(c))
            .map(String::as_str);
        containers.select(preferred)
    }

    /// Load raw field `config` from its preferred container, retrying the
    /// primary container when the variable is absent there. `None` when no
    /// container is staged for it.
    pub async fn load_raw(
        &self,
        config: &ResolvedFieldConfig,
        containers: &ContainerSet,
    ) -> Option<extraction::Result<Grid>> {
        let container = self.container_for(config, containers)?;
        let result = self.loader.load_raw(container, config).await;
        match (result, containers.primary_path()) {
            (Err(e), Some(primary)) if e.is_not_found() && primary != container => {
                debug!(
                    field = %config.name,
                    container = %container.display(),
                    "Not in preferred container, trying primary"
                );
                Some(self.loader.load_raw(primary, config).await)
            }
            (result, _) => Some(result),
        }
    }

    /// Compute derived field `name` for one step.
    #[instrument(skip(self, config, containers))]
    pub async fn compute(
        &self,
        name: &str,
        config: &ResolvedFieldConfig,
        containers: &ContainerSet,
    ) -> Result<Grid> {
        self.compute_with_ancestors(name, config, containers, Vec::new())
            .await
    }

    fn compute_with_ancestors<'a>(
        &'a self,
        name: &'a str,
        config: &'a ResolvedFieldConfig,
        containers: &'a ContainerSet,
        mut ancestors: Vec<String>,
    ) -> BoxFuture<'a, Result<Grid>> {
        async move {
            let derived = config.as_derived().ok_or_else(|| {
                DerivedError::configuration(name, "field has no derived recipe")
            })?;
            ancestors.push(name.to_string());

            let mut loaded: Vec<(String, Grid)> = Vec::with_capacity(derived.inputs.len());
            for input in &derived.inputs {
                if ancestors.iter().any(|a| a == input) {
                    let chain = ancestors
                        .iter()
                        .chain(std::iter::once(input))
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(" -> ");
                    return Err(DerivedError::configuration(
                        name,
                        format!("input cycle: {}", chain),
                    ));
                }
                let grid = self
                    .load_input(name, input, containers, &ancestors)
                    .await?;
                loaded.push((input.clone(), grid));
            }

            if config.is_composite() {
                debug!(field = %name, inputs = loaded.len(), "Packaging composite");
                return package_composite(config, loaded)
                    .ok_or_else(|| DerivedError::configuration(name, "no inputs"));
            }

            let function = self.functions.get(&derived.function).ok_or_else(|| {
                DerivedError::configuration(
                    name,
                    format!("unknown function '{}'", derived.function),
                )
            })?;
            let inputs: Vec<&Grid> = loaded.iter().map(|(_, g)| g).collect();
            let mut result = function
                .call(&inputs)
                .map_err(|e| DerivedError::configuration(name, e.to_string()))?;

            if !result.has_coordinates() {
                result.coordinates = loaded
                    .iter()
                    .find_map(|(_, g)| g.coordinates.clone());
            }
            result.name = name.to_string();
            result.set_attr("long_name", config.title.clone());
            result.set_attr("units", config.units.clone());
            result.set_attr("derived", true);
            debug!(field = %name, function = %derived.function, "Computed derived field");
            Ok(result)
        }
        .boxed()
    }

    async fn load_input(
        &self,
        field: &str,
        input: &str,
        containers: &ContainerSet,
        ancestors: &[String],
    ) -> Result<Grid> {
        let input_config = self.registry.get(input).map_err(|e| match e {
            ConfigError::FieldNotFound(_) => {
                DerivedError::configuration(field, format!("unknown input '{}'", input))
            }
            other => DerivedError::configuration(field, other.to_string()),
        })?;

        if input_config.is_derived() {
            return self
                .compute_with_ancestors(input, &input_config, containers, ancestors.to_vec())
                .await
                .map_err(|e| match e {
                    DerivedError::NotFound { reason, .. } => DerivedError::not_found(
                        field,
                        format!("input '{}': {}", input, reason),
                    ),
                    other => other,
                });
        }

        self.load_raw(&input_config, containers)
            .await
            .ok_or_else(|| {
                DerivedError::not_found(field, format!("no container for input '{}'", input))
            })?
            .map_err(|e| DerivedError::not_found(field, format!("input '{}': {}", input, e)))
    }
}

/// First input, carrying every input in its `components` side-table.
fn package_composite(config: &ResolvedFieldConfig, loaded: Vec<(String, Grid)>) -> Option<Grid> {
    let names: Vec<Value> = loaded.iter().map(|(n, _)| json!(n)).collect();
    let mut first = loaded.first()?.1.clone();
    first.name = config.name.clone();
    first.components = Some(loaded.into_iter().collect());
    first.set_attr("composite_inputs", Value::Array(names));
    first.set_attr(
        "plot_style",
        config
            .plot_style
            .as_ref()
            .map(|s| json!(s.as_str()))
            .unwrap_or(Value::Null),
    );
    first.set_attr(
        "plot_config",
        config.plot_config.clone().unwrap_or_else(|| json!({})),
    );
    first.set_attr("long_name", config.title.clone());
    first.set_attr("units", config.units.clone());
    first.set_attr("derived", true);
    Some(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_selection_prefers_category() {
        let set = ContainerSet::new("pressure")
            .with_file("pressure", "/s/prs.grib2")
            .with_file("surface", "/s/sfc.grib2");
        assert_eq!(set.select(Some("surface")), Some(Path::new("/s/sfc.grib2")));
        assert_eq!(set.select(Some("subhourly")), Some(Path::new("/s/prs.grib2")));
        assert_eq!(set.select(None), Some(Path::new("/s/prs.grib2")));
        assert_eq!(ContainerSet::new("pressure").select(None), None);
    }
}
