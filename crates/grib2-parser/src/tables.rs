//! Configurable GRIB2 parameter and level tables.
//!
//! Entries here take precedence over the built-in NCEP names in
//! [`crate::sections`]. Models whose local tables differ (or which use
//! parameter numbers the built-ins do not know) add mappings from their YAML
//! configuration.

use std::collections::HashMap;

/// Lookup key for parameter: (discipline, category, number)
pub type ParamKey = (u8, u8, u8);

/// Level description - either static text or a template with placeholders
#[derive(Debug, Clone, PartialEq)]
pub enum LevelDescription {
    Static(String),
    /// Supports `{value}` (level value as decoded) and `{value_mb}` (Pa / 100).
    Template(String),
}

impl LevelDescription {
    pub fn format(&self, value: f64) -> String {
        match self {
            LevelDescription::Static(s) => s.clone(),
            LevelDescription::Template(t) => t
                .replace("{value_mb}", &(value / 100.0).to_string())
                .replace("{value}", &value.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Grib2Tables {
    parameters: HashMap<ParamKey, String>,
    levels: HashMap<u8, LevelDescription>,
}

impl Grib2Tables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_parameter(&mut self, discipline: u8, category: u8, number: u8, name: String) {
        self.parameters.insert((discipline, category, number), name);
    }

    pub fn add_level(&mut self, level_type: u8, description: LevelDescription) {
        self.levels.insert(level_type, description);
    }

    pub fn lookup_parameter(&self, discipline: u8, category: u8, number: u8) -> Option<&str> {
        self.parameters
            .get(&(discipline, category, number))
            .map(String::as_str)
    }

    pub fn lookup_level(&self, level_type: u8, level_value: f64) -> Option<String> {
        self.levels.get(&level_type).map(|d| d.format(level_value))
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty() && self.levels.is_empty()
    }
}
