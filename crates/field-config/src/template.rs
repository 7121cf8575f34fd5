//! Template inheritance for field definitions.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::{Map, Value};
use tracing::debug;

use crate::access::access_pattern;
use crate::definition::{RawDefinition, ResolvedFieldConfig};
use crate::error::{ConfigError, Result};

const BUILTIN_TEMPLATES: &str = include_str!("templates.yaml");

/// Loose keys folded into the access bag when an access pattern is used.
const LOOSE_ACCESS_KEYS: [&str; 3] = ["level", "stepType", "shortName"];

/// Flattens template chains into resolved field configurations.
#[derive(Debug, Clone, Default)]
pub struct TemplateResolver {
    templates: BTreeMap<String, RawDefinition>,
}

impl TemplateResolver {
    /// A resolver with no templates.
    pub fn new() -> Self {
        Self::default()
    }

    /// A resolver seeded with the built-in template table.
    pub fn builtin() -> Result<Self> {
        let templates: BTreeMap<String, RawDefinition> = serde_yaml::from_str(BUILTIN_TEMPLATES)
            .map_err(|source| ConfigError::Yaml {
                path: PathBuf::from("templates.yaml"),
                source,
            })?;
        Ok(Self { templates })
    }

    pub fn add_template(&mut self, name: impl Into<String>, definition: RawDefinition) {
        self.templates.insert(name.into(), definition);
    }

    /// Add or replace templates.
    pub fn extend(&mut self, templates: impl IntoIterator<Item = (String, RawDefinition)>) {
        self.templates.extend(templates);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn template(&self, name: &str) -> Option<&RawDefinition> {
        self.templates.get(name)
    }

    pub fn template_names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Resolve and validate one field definition.
    pub fn resolve(&self, name: &str, definition: &RawDefinition) -> Result<ResolvedFieldConfig> {
        let merged = self.resolve_raw(name, definition)?;
        ResolvedFieldConfig::from_merged(name, &merged)
    }

    /// Resolve to the flat untyped record, without validation.
    pub fn resolve_raw(&self, name: &str, definition: &RawDefinition) -> Result<RawDefinition> {
        let mut chain = Vec::new();
        let mut merged = self.merge_chain(name, definition, &mut chain)?;
        debug!(field = %name, depth = chain.len(), "Resolved template chain");

        apply_access_pattern(name, &mut merged)?;
        build_title(&mut merged);
        Ok(merged)
    }

    /// Merge `definition` over its ancestors. `chain` holds the template
    /// names visited so far; the field name itself is not part of it so a
    /// field may share its template's name.
    fn merge_chain(
        &self,
        field: &str,
        definition: &RawDefinition,
        chain: &mut Vec<String>,
    ) -> Result<RawDefinition> {
        let parent = match definition.get("template") {
            None | Some(Value::Null) => None,
            Some(Value::String(parent)) => Some(parent.clone()),
            Some(_) => return Err(ConfigError::invalid(field, "template", "expected a name")),
        };

        let mut merged = match parent {
            None => Map::new(),
            Some(parent) => {
                if chain.contains(&parent) {
                    let mut names = chain.clone();
                    names.push(parent);
                    return Err(ConfigError::TemplateCycle {
                        chain: names.join(" -> "),
                    });
                }
                let parent_definition =
                    self.templates
                        .get(&parent)
                        .ok_or_else(|| ConfigError::UnknownTemplate {
                            field: field.to_string(),
                            template: parent.clone(),
                        })?;
                chain.push(parent);
                self.merge_chain(field, parent_definition, chain)?
            }
        };

        for (key, value) in definition {
            if key == "template" {
                continue;
            }
            if key == "access" {
                if let (Some(Value::Object(base)), Value::Object(child)) =
                    (merged.get_mut("access"), value)
                {
                    for (k, v) in child {
                        base.insert(k.clone(), v.clone());
                    }
                    continue;
                }
            }
            merged.insert(key.clone(), value.clone());
        }

        Ok(merged)
    }
}

/// Expand `access_pattern` into a concrete `access` bag. The pattern's bag
/// replaces any merged `access`; only the loose keys are overlaid.
fn apply_access_pattern(field: &str, merged: &mut RawDefinition) -> Result<()> {
    let pattern = match merged.remove("access_pattern") {
        None | Some(Value::Null) => return Ok(()),
        Some(Value::String(pattern)) => pattern,
        Some(_) => {
            return Err(ConfigError::invalid(field, "access_pattern", "expected a name"));
        }
    };

    let mut access =
        access_pattern(&pattern).ok_or_else(|| ConfigError::UnknownAccessPattern {
            field: field.to_string(),
            pattern: pattern.clone(),
        })?;

    for key in LOOSE_ACCESS_KEYS {
        if let Some(value) = merged.remove(key) {
            access.insert(key.to_string(), value);
        }
    }

    // `paramId` wins over the snake-case spelling.
    let snake = merged.remove("param_id");
    if let Some(value) = merged.remove("paramId").or(snake) {
        access.insert("paramId".to_string(), value);
    }

    merged.insert("access".to_string(), Value::Object(access));
    Ok(())
}

/// Join `title_prefix`, the base title and `title_suffix`.
fn build_title(merged: &mut RawDefinition) {
    let prefix = merged.remove("title_prefix");
    let suffix = merged.remove("title_suffix");
    if prefix.is_none() && suffix.is_none() {
        return;
    }

    let var = merged.get("var").and_then(Value::as_str).unwrap_or_default();
    let base = merged
        .get("title")
        .and_then(Value::as_str)
        .or_else(|| merged.get("var").and_then(Value::as_str))
        .unwrap_or("Unknown");

    let base = if base.contains("CAPE") || var == "cape" {
        "CAPE"
    } else if base.contains("CIN") || var == "cin" {
        "CIN"
    } else {
        base
    };

    let mut parts = Vec::with_capacity(3);
    if let Some(prefix) = prefix {
        parts.push(text(prefix));
    }
    parts.push(base.to_string());
    if let Some(suffix) = suffix {
        parts.push(text(suffix));
    }

    merged.insert("title".to_string(), Value::String(parts.join(" ")));
}

fn text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{Extend, Transform};
    use serde_json::json;

    fn record(value: Value) -> RawDefinition {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_builtin_templates_parse() {
        let resolver = TemplateResolver::builtin().unwrap();
        assert!(resolver.contains("cape_base"));
        assert!(resolver.contains("smoke_column"));
        assert!(resolver.len() > 30);
    }

    #[test]
    fn test_mixed_layer_cape_from_builtin() {
        let resolver = TemplateResolver::builtin().unwrap();
        let config = resolver
            .resolve("mlcape", &record(json!({"template": "mixed_layer_cape"})))
            .unwrap();

        assert_eq!(config.title, "Mixed-Layer CAPE (180-0 mb)");
        assert_eq!(config.units, "J/kg");
        assert_eq!(config.extend, Extend::Max);
        let raw = config.as_raw().unwrap();
        assert_eq!(raw.var, "cape");
        assert_eq!(raw.access["typeOfLevel"], "pressureFromGroundLayer");
        assert_eq!(raw.access["stepType"], "instant");
        assert_eq!(raw.access["level"], 18000);
    }

    #[test]
    fn test_param_id_absorbed() {
        let resolver = TemplateResolver::builtin().unwrap();
        let config = resolver
            .resolve(
                "t2m",
                &record(json!({
                    "template": "surface_temperature",
                    "param_id": 167,
                    "var": "t2m",
                    "title": "2m Temperature"
                })),
            )
            .unwrap();

        assert_eq!(config.transform, Some(Transform::Celsius));
        let raw = config.as_raw().unwrap();
        assert_eq!(raw.access.len(), 1);
        assert_eq!(raw.access["paramId"], 167);
        assert!(!config.extras.contains_key("param_id"));
    }

    #[test]
    fn test_child_level_overrides_inherited_pattern() {
        let resolver = TemplateResolver::builtin().unwrap();
        let merged = resolver
            .resolve_raw("uh25", &record(json!({"template": "updraft_helicity_25km"})))
            .unwrap();

        assert_eq!(merged["access"]["level"], json!([5000, 2000]));
        assert_eq!(merged["access"]["stepType"], "max");
        assert!(!merged.contains_key("level"));
        assert!(!merged.contains_key("access_pattern"));
    }

    #[test]
    fn test_nested_access_merges_key_by_key() {
        let mut resolver = TemplateResolver::new();
        resolver.add_template(
            "base",
            record(json!({"access": {"typeOfLevel": "surface", "stepType": "instant"}})),
        );
        let merged = resolver
            .resolve_raw(
                "f",
                &record(json!({"template": "base", "access": {"stepType": "avg"}})),
            )
            .unwrap();

        assert_eq!(merged["access"], json!({"typeOfLevel": "surface", "stepType": "avg"}));
    }

    #[test]
    fn test_access_pattern_replaces_inherited_access() {
        let mut resolver = TemplateResolver::new();
        resolver.add_template(
            "base",
            record(json!({"access": {"typeOfLevel": "surface", "stepType": "avg", "topLevel": 3}})),
        );
        let merged = resolver
            .resolve_raw(
                "mlcape",
                &record(json!({
                    "template": "base",
                    "access_pattern": "pressure_layer",
                    "level": 18000
                })),
            )
            .unwrap();

        assert_eq!(
            merged["access"],
            json!({
                "typeOfLevel": "pressureFromGroundLayer",
                "stepType": "instant",
                "level": 18000
            })
        );
    }

    #[test]
    fn test_field_may_share_template_name() {
        let resolver = TemplateResolver::builtin().unwrap();
        let config = resolver
            .resolve("vil", &record(json!({"template": "vil"})))
            .unwrap();
        assert_eq!(config.as_raw().unwrap().shortname_aliases, vec!["VIL"]);
    }

    #[test]
    fn test_unknown_pattern_and_template() {
        let resolver = TemplateResolver::new();
        let err = resolver
            .resolve_raw("f", &record(json!({"access_pattern": "isobaric"})))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAccessPattern { .. }));

        let err = resolver
            .resolve_raw("f", &record(json!({"template": "nope"})))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTemplate { ref template, .. } if template == "nope"));
    }

    #[test]
    fn test_title_from_var_when_no_title() {
        let mut merged = record(json!({"var": "hlcy", "title_suffix": "(0-1 km)"}));
        build_title(&mut merged);
        assert_eq!(merged["title"], "hlcy (0-1 km)");
        assert!(!merged.contains_key("title_suffix"));
    }
}
