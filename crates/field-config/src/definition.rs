//! Raw and resolved field definitions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ConfigError, Result};

/// An untyped field definition as it appears in the configuration store.
pub type RawDefinition = Map<String, Value>;

/// Keys consumed into typed attributes; everything else lands in `extras`.
const KNOWN_KEYS: &[&str] = &[
    "name",
    "title",
    "units",
    "cmap",
    "levels",
    "extend",
    "category",
    "description",
    "transform",
    "plot_style",
    "plot_config",
    "derived",
    "inputs",
    "function",
    "access",
    "var",
    "requires_multi_dataset",
    "wgrib2_pattern",
    "grib_shortname_match",
    "level_selection",
    "process",
];

/// Colorbar extension policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extend {
    Neither,
    Min,
    Max,
    Both,
}

/// Named unit or scale conversion applied after extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    Abs,
    Celsius,
    Mb,
    SmokeConcentration,
    SmokeColumn,
    DustConcentration,
    PrateUnits,
    HailSize,
}

/// Render style requested by a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PlotStyle {
    Filled,
    Lines,
    Composite,
    LinesWithBarbs,
    Other(String),
}

impl PlotStyle {
    /// Styles that draw several unreduced inputs together.
    pub fn is_multi_layer(&self) -> bool {
        matches!(
            self,
            PlotStyle::Lines | PlotStyle::Composite | PlotStyle::LinesWithBarbs
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            PlotStyle::Filled => "filled",
            PlotStyle::Lines => "lines",
            PlotStyle::Composite => "composite",
            PlotStyle::LinesWithBarbs => "lines_with_barbs",
            PlotStyle::Other(s) => s,
        }
    }
}

impl From<String> for PlotStyle {
    fn from(s: String) -> Self {
        match s.as_str() {
            "filled" => PlotStyle::Filled,
            "lines" => PlotStyle::Lines,
            "composite" => PlotStyle::Composite,
            "lines_with_barbs" => PlotStyle::LinesWithBarbs,
            _ => PlotStyle::Other(s),
        }
    }
}

impl From<PlotStyle> for String {
    fn from(style: PlotStyle) -> Self {
        style.as_str().to_string()
    }
}

impl fmt::Display for PlotStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which layer to keep when a record carries several.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LayerSelection {
    /// Layer index; out of range falls back to the last layer.
    Index(i64),
    /// Layer whose coordinate equals `top`, else the closest to it.
    Range { bottom: f64, top: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFieldConfig {
    /// Key/value filter used to open the container (`typeOfLevel`, `level`, ...).
    pub access: BTreeMap<String, Value>,
    /// Variable name inside the opened dataset.
    pub var: String,
    #[serde(default)]
    pub requires_multi_dataset: bool,
    /// Match pattern for the external extraction utility.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shortname_aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_selection: Option<LayerSelection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
}

impl RawFieldConfig {
    /// Numeric `level` from the access bag (first element if it is a list).
    pub fn access_level(&self) -> Option<f64> {
        match self.access.get("level")? {
            Value::Number(n) => n.as_f64(),
            Value::Array(items) => items.first().and_then(Value::as_f64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedFieldConfig {
    pub inputs: Vec<String>,
    pub function: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    Raw(RawFieldConfig),
    Derived(DerivedFieldConfig),
}

/// Flat, template-free configuration of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedFieldConfig {
    pub name: String,
    pub title: String,
    pub units: String,
    pub colormap: String,
    pub levels: Vec<f64>,
    pub extend: Extend,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plot_style: Option<PlotStyle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plot_config: Option<Value>,
    #[serde(flatten)]
    pub kind: FieldKind,
    /// Keys with no typed meaning, kept verbatim.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, Value>,
}

impl ResolvedFieldConfig {
    /// Convert a fully merged record into the typed configuration.
    pub fn from_merged(name: &str, merged: &RawDefinition) -> Result<Self> {
        let fields = Fields { name, map: merged };

        let is_derived = fields.bool("derived")?;
        let kind = if is_derived {
            let inputs = fields.string_list("inputs")?.unwrap_or_default();
            if inputs.is_empty() {
                return Err(ConfigError::missing(name, "inputs"));
            }
            FieldKind::Derived(DerivedFieldConfig {
                inputs,
                function: fields.required_str("function")?,
            })
        } else {
            let access = match merged.get("access") {
                Some(Value::Object(map)) => map.clone().into_iter().collect(),
                Some(_) => return Err(ConfigError::invalid(name, "access", "expected a mapping")),
                None => return Err(ConfigError::missing(name, "access")),
            };
            FieldKind::Raw(RawFieldConfig {
                access,
                var: fields.required_str("var")?,
                requires_multi_dataset: fields.bool("requires_multi_dataset")?,
                extraction_hint: fields.optional_str("wgrib2_pattern")?,
                shortname_aliases: fields.string_list("grib_shortname_match")?.unwrap_or_default(),
                layer_selection: fields.typed("level_selection")?,
                process: fields.optional_str("process")?,
            })
        };

        let extras = merged
            .iter()
            .filter(|(k, _)| !KNOWN_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            name: name.to_string(),
            title: fields.required_str("title")?,
            units: fields.required_str("units")?,
            colormap: fields.required_str("cmap")?,
            levels: fields.levels()?,
            extend: fields
                .typed("extend")?
                .ok_or_else(|| ConfigError::missing(name, "extend"))?,
            category: fields.optional_str("category")?,
            description: fields.optional_str("description")?,
            transform: fields.typed("transform")?,
            plot_style: fields.typed("plot_style")?,
            plot_config: merged.get("plot_config").cloned(),
            kind,
            extras,
        })
    }

    pub fn is_derived(&self) -> bool {
        matches!(self.kind, FieldKind::Derived(_))
    }

    pub fn as_raw(&self) -> Option<&RawFieldConfig> {
        match &self.kind {
            FieldKind::Raw(raw) => Some(raw),
            FieldKind::Derived(_) => None,
        }
    }

    pub fn as_derived(&self) -> Option<&DerivedFieldConfig> {
        match &self.kind {
            FieldKind::Derived(derived) => Some(derived),
            FieldKind::Raw(_) => None,
        }
    }

    /// Derived field rendered from several unreduced inputs.
    pub fn is_composite(&self) -> bool {
        let multi_layer = self
            .plot_style
            .as_ref()
            .map(PlotStyle::is_multi_layer)
            .unwrap_or(false);
        match &self.kind {
            FieldKind::Derived(derived) => multi_layer && derived.function == "identity",
            FieldKind::Raw(_) => false,
        }
    }

    /// Pretty JSON, stable for identical configurations.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Typed accessors over a merged record, with errors naming the attribute.
struct Fields<'a> {
    name: &'a str,
    map: &'a RawDefinition,
}

impl Fields<'_> {
    fn required_str(&self, key: &str) -> Result<String> {
        self.optional_str(key)?
            .ok_or_else(|| ConfigError::missing(self.name, key))
    }

    fn optional_str(&self, key: &str) -> Result<Option<String>> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(_) => Err(ConfigError::invalid(self.name, key, "expected a string")),
        }
    }

    fn bool(&self, key: &str) -> Result<bool> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(ConfigError::invalid(self.name, key, "expected a boolean")),
        }
    }

    /// A string or a list of strings.
    fn string_list(&self, key: &str) -> Result<Option<Vec<String>>> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(vec![s.clone()])),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| ConfigError::invalid(self.name, key, "expected strings"))
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(_) => Err(ConfigError::invalid(self.name, key, "expected a list")),
        }
    }

    fn levels(&self) -> Result<Vec<f64>> {
        let items = match self.map.get("levels") {
            Some(Value::Array(items)) => items,
            Some(_) => return Err(ConfigError::invalid(self.name, "levels", "expected a list")),
            None => return Err(ConfigError::missing(self.name, "levels")),
        };
        items
            .iter()
            .map(|v| {
                v.as_f64()
                    .ok_or_else(|| ConfigError::invalid(self.name, "levels", "expected numbers"))
            })
            .collect()
    }

    fn typed<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| ConfigError::invalid(self.name, key, e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RawDefinition {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn raw_record() -> RawDefinition {
        record(json!({
            "title": "2m Temperature",
            "units": "°C",
            "cmap": "RdYlBu_r",
            "levels": [-10, 0, 10, 20],
            "extend": "both",
            "access": {"paramId": 167},
            "var": "t2m",
            "transform": "celsius",
            "category": "surface",
            "colorbar_ticks": 5
        }))
    }

    #[test]
    fn test_raw_field_from_merged() {
        let config = ResolvedFieldConfig::from_merged("t2m", &raw_record()).unwrap();

        assert_eq!(config.transform, Some(Transform::Celsius));
        assert_eq!(config.extend, Extend::Both);
        assert_eq!(config.levels, vec![-10.0, 0.0, 10.0, 20.0]);
        assert_eq!(config.extras["colorbar_ticks"], 5);
        let raw = config.as_raw().unwrap();
        assert_eq!(raw.var, "t2m");
        assert_eq!(raw.access["paramId"], 167);
    }

    #[test]
    fn test_missing_attribute_is_named() {
        let mut record = raw_record();
        record.remove("cmap");
        let err = ResolvedFieldConfig::from_merged("t2m", &record).unwrap_err();
        assert!(matches!(err, ConfigError::MissingAttribute { ref attribute, .. } if attribute == "cmap"));

        let mut record = raw_record();
        record.remove("var");
        let err = ResolvedFieldConfig::from_merged("t2m", &record).unwrap_err();
        assert!(matches!(err, ConfigError::MissingAttribute { ref attribute, .. } if attribute == "var"));
    }

    #[test]
    fn test_derived_needs_inputs() {
        let mut record = raw_record();
        record.insert("derived".into(), json!(true));
        record.insert("function".into(), json!("wind_speed"));
        record.insert("inputs".into(), json!([]));
        let err = ResolvedFieldConfig::from_merged("wspd", &record).unwrap_err();
        assert!(matches!(err, ConfigError::MissingAttribute { ref attribute, .. } if attribute == "inputs"));

        record.insert("inputs".into(), json!(["u10", "v10"]));
        let config = ResolvedFieldConfig::from_merged("wspd", &record).unwrap();
        assert_eq!(config.as_derived().unwrap().inputs, vec!["u10", "v10"]);
    }

    #[test]
    fn test_composite_requires_identity_and_multi_layer_style() {
        let mut record = raw_record();
        record.insert("derived".into(), json!(true));
        record.insert("inputs".into(), json!(["a", "b"]));
        record.insert("function".into(), json!("identity"));
        record.insert("plot_style".into(), json!("lines_with_barbs"));
        assert!(ResolvedFieldConfig::from_merged("c", &record).unwrap().is_composite());

        record.insert("function".into(), json!("wind_speed"));
        assert!(!ResolvedFieldConfig::from_merged("c", &record).unwrap().is_composite());

        record.insert("function".into(), json!("identity"));
        record.insert("plot_style".into(), json!("filled_with_contours"));
        let config = ResolvedFieldConfig::from_merged("c", &record).unwrap();
        assert!(!config.is_composite());
        assert_eq!(
            config.plot_style,
            Some(PlotStyle::Other("filled_with_contours".to_string()))
        );
    }

    #[test]
    fn test_layer_selection_forms() {
        let mut record = raw_record();
        record.insert("level_selection".into(), json!({"bottom": 0, "top": 3000}));
        let config = ResolvedFieldConfig::from_merged("uh", &record).unwrap();
        assert_eq!(
            config.as_raw().unwrap().layer_selection,
            Some(LayerSelection::Range { bottom: 0.0, top: 3000.0 })
        );

        record.insert("level_selection".into(), json!(1));
        let config = ResolvedFieldConfig::from_merged("uh", &record).unwrap();
        assert_eq!(config.as_raw().unwrap().layer_selection, Some(LayerSelection::Index(1)));
    }

    #[test]
    fn test_unknown_transform_rejected() {
        let mut record = raw_record();
        record.insert("transform".into(), json!("fahrenheit"));
        let err = ResolvedFieldConfig::from_merged("t2m", &record).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref attribute, .. } if attribute == "transform"));
    }
}
