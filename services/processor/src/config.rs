//! Model configuration loaded from `<config_dir>/models/*.yaml`.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use grib2_parser::{Grib2Tables, LevelDescription};
use serde::Deserialize;
use tracing::{debug, info, warn};
use wx_common::StepKey;

/// One model: where its files live, when it runs, how it is processed.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub model: String,
    #[serde(default)]
    pub name: String,
    pub source: SourceConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// Extra GRIB2 table entries for this model's local parameters.
    #[serde(default)]
    pub grib_tables: GribTablesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// e.g. `hrrr.t{hour:02}z.{file_type}f{fhr:02}.grib2`
    pub filename_pattern: String,
    /// File category to the token substituted for `{file_type}`.
    pub file_types: BTreeMap<String, String>,
    /// URL templates with `{date}`, `{hour}` and `{filename}`, tried in order.
    pub mirrors: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_cycles")]
    pub cycles: Vec<u32>,
    #[serde(default)]
    pub delay_hours: u32,
    #[serde(default)]
    pub forecast_hours: ForecastHoursConfig,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cycles: default_cycles(),
            delay_hours: 0,
            forecast_hours: ForecastHoursConfig::default(),
        }
    }
}

fn default_cycles() -> Vec<u32> {
    (0..24).collect()
}

/// Longest forecast per cycle hour.
#[derive(Debug, Clone, Deserialize)]
pub struct ForecastHoursConfig {
    #[serde(default = "default_max_hour")]
    pub default_max: u32,
    #[serde(default = "default_overrides")]
    pub overrides: BTreeMap<u32, u32>,
}

impl Default for ForecastHoursConfig {
    fn default() -> Self {
        Self {
            default_max: default_max_hour(),
            overrides: default_overrides(),
        }
    }
}

fn default_max_hour() -> u32 {
    18
}

fn default_overrides() -> BTreeMap<u32, u32> {
    [0, 6, 12, 18].into_iter().map(|h| (h, 48)).collect()
}

impl ForecastHoursConfig {
    pub fn max_for_cycle(&self, cycle_hour: u32) -> u32 {
        self.overrides
            .get(&cycle_hour)
            .copied()
            .unwrap_or(self.default_max)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_primary_file_type")]
    pub primary_file_type: String,
    /// Field category to preferred file category.
    #[serde(default = "default_category_file_types")]
    pub category_file_types: BTreeMap<String, String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            primary_file_type: default_primary_file_type(),
            category_file_types: default_category_file_types(),
        }
    }
}

fn default_primary_file_type() -> String {
    "pressure".to_string()
}

fn default_category_file_types() -> BTreeMap<String, String> {
    BTreeMap::from([("smoke".to_string(), "surface".to_string())])
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GribTablesConfig {
    #[serde(default)]
    pub parameters: Vec<ParameterEntry>,
    #[serde(default)]
    pub levels: Vec<LevelEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParameterEntry {
    pub discipline: u8,
    pub category: u8,
    pub number: u8,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LevelEntry {
    pub level_type: u8,
    /// Static text, or a template using `{value}` / `{value_mb}`.
    pub description: String,
}

impl GribTablesConfig {
    pub fn to_tables(&self) -> Grib2Tables {
        let mut tables = Grib2Tables::new();
        for p in &self.parameters {
            tables.add_parameter(p.discipline, p.category, p.number, p.name.clone());
        }
        for l in &self.levels {
            let description = if l.description.contains("{value") {
                LevelDescription::Template(l.description.clone())
            } else {
                LevelDescription::Static(l.description.clone())
            };
            tables.add_level(l.level_type, description);
        }
        tables
    }
}

impl ModelConfig {
    /// Load a model configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: ModelConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        debug!(model = %config.model, path = %path.display(), "Loaded model config");
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.source.mirrors.is_empty() {
            bail!("model '{}' has no mirrors", self.model);
        }
        if !self
            .source
            .file_types
            .contains_key(&self.processing.primary_file_type)
        {
            bail!(
                "model '{}' has no file type for primary category '{}'",
                self.model,
                self.processing.primary_file_type
            );
        }
        Ok(())
    }

    /// File categories in a stable order, primary first.
    pub fn file_categories(&self) -> Vec<String> {
        let primary = &self.processing.primary_file_type;
        std::iter::once(primary.clone())
            .chain(
                self.source
                    .file_types
                    .keys()
                    .filter(|c| *c != primary)
                    .cloned(),
            )
            .collect()
    }

    /// Container file name for one step and file category.
    pub fn filename(&self, step: &StepKey, category: &str) -> Option<String> {
        let file_type = self.source.file_types.get(category)?;
        let hour = step.run.cycle_hour();
        let fhr = step.forecast_hour;
        Some(
            self.source
                .filename_pattern
                .replace("{model}", &self.model)
                .replace("{hour:02}", &format!("{:02}", hour))
                .replace("{hour}", &hour.to_string())
                .replace("{file_type}", file_type)
                .replace("{fhr:03}", &format!("{:03}", fhr))
                .replace("{fhr:02}", &format!("{:02}", fhr))
                .replace("{fhr}", &fhr.to_string()),
        )
    }

    /// Mirror URLs for one step and file category, in preference order.
    pub fn urls(&self, step: &StepKey, category: &str) -> Vec<String> {
        let Some(filename) = self.filename(step, category) else {
            return Vec::new();
        };
        let date = step.run.date_str();
        let hour = format!("{:02}", step.run.cycle_hour());
        self.source
            .mirrors
            .iter()
            .map(|template| {
                template
                    .replace("{model}", &self.model)
                    .replace("{date}", &date)
                    .replace("{hour}", &hour)
                    .replace("{filename}", &filename)
            })
            .collect()
    }

    pub fn max_forecast_hour(&self, cycle_hour: u32) -> u32 {
        self.schedule.forecast_hours.max_for_cycle(cycle_hour)
    }
}

/// Load every model configuration under `<config_dir>/models`, in file name
/// order. Invalid files are logged and skipped.
pub fn load_model_configs(config_dir: &Path) -> Result<Vec<ModelConfig>> {
    let models_dir = config_dir.join("models");

    if !models_dir.exists() {
        warn!(path = %models_dir.display(), "Models config directory not found");
        return Ok(Vec::new());
    }

    let mut paths: Vec<_> = std::fs::read_dir(&models_dir)
        .with_context(|| format!("Failed to list {}", models_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().map_or(false, |ext| ext == "yaml" || ext == "yml"))
        .collect();
    paths.sort();

    let mut configs = Vec::new();
    for path in paths {
        match ModelConfig::load(&path) {
            Ok(config) => {
                info!(model = %config.model, name = %config.name, "Loaded model configuration");
                configs.push(config);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load model config");
            }
        }
    }

    info!(count = configs.len(), "Loaded model configurations");
    Ok(configs)
}

/// Parse `0-18` or `0,3,6` into forecast hours, dropping any beyond `max`.
pub fn parse_hours(spec: &str, max: u32) -> Result<Vec<u32>> {
    let spec = spec.trim();
    let mut hours: Vec<u32> = if let Some((start, end)) = spec.split_once('-') {
        let start: u32 = start.trim().parse().context("invalid start hour")?;
        let end: u32 = end.trim().parse().context("invalid end hour")?;
        if start > end {
            bail!("hour range {} is reversed", spec);
        }
        (start..=end).collect()
    } else {
        spec.split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim()
                    .parse::<u32>()
                    .with_context(|| format!("invalid hour '{}'", s.trim()))
            })
            .collect::<Result<_>>()?
    };
    hours.retain(|h| *h <= max);
    hours.dedup();
    Ok(hours)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::MODEL_CONFIG_YAML;
    use wx_common::RunKey;

    fn hrrr() -> ModelConfig {
        serde_yaml::from_str(MODEL_CONFIG_YAML).unwrap()
    }

    #[test]
    fn test_parse_fixture_config() {
        let config = hrrr();
        assert_eq!(config.model, "hrrr");
        assert_eq!(config.schedule.cycles, vec![0, 6, 12, 18]);
        assert_eq!(config.file_categories(), vec!["pressure", "surface"]);
        assert_eq!(config.max_forecast_hour(12), 48);
        assert_eq!(config.max_forecast_hour(6), 18);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_filename_and_urls() {
        let config = hrrr();
        let step = RunKey::parse("hrrr", "2025121006").unwrap().step(3);
        assert_eq!(
            config.filename(&step, "surface").as_deref(),
            Some("hrrr.t06z.wrfsfcf03.grib2")
        );
        assert_eq!(
            config.urls(&step, "pressure"),
            vec![
                "https://mirror-a.example/hrrr.20251210/conus/hrrr.t06z.wrfprsf03.grib2",
                "https://mirror-b.example/hrrr.20251210/conus/hrrr.t06z.wrfprsf03.grib2",
            ]
        );
        assert!(config.urls(&step, "native").is_empty());
    }

    #[test]
    fn test_defaults_apply() {
        let config: ModelConfig = serde_yaml::from_str(
            r#"
model: rap
source:
  filename_pattern: "rap.t{hour:02}z.awp130pgrbf{fhr:02}.grib2"
  file_types: {pressure: awp130pgrb}
  mirrors: ["https://example/{filename}"]
"#,
        )
        .unwrap();
        assert_eq!(config.schedule.cycles.len(), 24);
        assert_eq!(config.max_forecast_hour(18), 48);
        assert_eq!(config.max_forecast_hour(3), 18);
        assert_eq!(config.processing.category_file_types["smoke"], "surface");
    }

    #[test]
    fn test_grib_tables_from_config() {
        let tables = GribTablesConfig {
            parameters: vec![ParameterEntry {
                discipline: 0,
                category: 17,
                number: 192,
                name: "LTNG".to_string(),
            }],
            levels: vec![LevelEntry {
                level_type: 100,
                description: "{value_mb} mb".to_string(),
            }],
        }
        .to_tables();
        assert_eq!(tables.lookup_parameter(0, 17, 192), Some("LTNG"));
        assert_eq!(tables.lookup_level(100, 50000.0).as_deref(), Some("500 mb"));
    }

    #[test]
    fn test_invalid_model_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        test_utils::write_files(
            &dir.path().join("models"),
            &[
                ("a_broken.yaml", "model: [unclosed"),
                ("hrrr.yaml", MODEL_CONFIG_YAML),
            ],
        )
        .unwrap();
        let configs = load_model_configs(dir.path()).unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].model, "hrrr");
    }

    #[test]
    fn test_parse_hours() {
        assert_eq!(parse_hours("0-3", 18).unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(parse_hours("0,3, 6,48", 18).unwrap(), vec![0, 3, 6]);
        assert_eq!(parse_hours("12-20", 18).unwrap(), vec![12, 13, 14, 15, 16, 17, 18]);
        assert!(parse_hours("6-3", 18).is_err());
        assert!(parse_hours("a,b", 18).is_err());
    }
}
