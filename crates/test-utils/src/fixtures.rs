//! Configuration fixtures shared by the field-config and processor tests.

use std::fs;
use std::io;
use std::path::Path;

use tempfile::TempDir;

/// Raw surface fields, JSON form.
pub const SURFACE_FIELDS_JSON: &str = r#"{
  "t2m": {
    "template": "surface_temperature",
    "param_id": 167,
    "var": "t2m",
    "title": "2m Temperature"
  },
  "u10": {
    "template": "surface_wind",
    "param_id": 165,
    "var": "u10",
    "title": "10m U Wind",
    "levels": [-20, -10, 0, 10, 20]
  },
  "v10": {
    "template": "surface_wind",
    "param_id": 166,
    "var": "v10",
    "title": "10m V Wind",
    "levels": [-20, -10, 0, 10, 20]
  }
}"#;

/// Derived fields over the surface winds, YAML form.
pub const DERIVED_FIELDS_YAML: &str = r#"
wind_speed_10m:
  title: 10m Wind Speed
  units: m/s
  cmap: viridis
  levels: [0, 5, 10, 15, 20, 25]
  extend: max
  category: surface
  derived: true
  inputs: [u10, v10]
  function: wind_speed

wind_barbs_10m:
  title: 10m Wind
  units: m/s
  cmap: viridis
  levels: [0, 5, 10, 15, 20, 25]
  extend: max
  category: surface
  derived: true
  inputs: [wind_speed_10m, u10, v10]
  function: identity
  plot_style: lines_with_barbs
"#;

/// Model configuration for a small hourly model with two mirrors.
pub const MODEL_CONFIG_YAML: &str = r#"
model: hrrr
name: "HRRR"
source:
  filename_pattern: "hrrr.t{hour:02}z.{file_type}f{fhr:02}.grib2"
  file_types:
    pressure: wrfprs
    surface: wrfsfc
  mirrors:
    - "https://mirror-a.example/hrrr.{date}/conus/{filename}"
    - "https://mirror-b.example/hrrr.{date}/conus/{filename}"
schedule:
  cycles: [0, 6, 12, 18]
  delay_hours: 2
  forecast_hours:
    default_max: 18
    overrides:
      0: 48
      12: 48
processing:
  primary_file_type: pressure
  category_file_types:
    smoke: surface
"#;

/// Write `(file name, contents)` pairs into `dir`, creating it if needed.
pub fn write_files(dir: &Path, files: &[(&str, &str)]) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    for (name, contents) in files {
        fs::write(dir.join(name), contents)?;
    }
    Ok(())
}

/// A temporary config root with `fields/` and `models/` populated from the
/// fixtures above.
pub fn temp_config_dir() -> io::Result<TempDir> {
    let root = TempDir::new()?;
    write_files(
        &root.path().join("fields"),
        &[
            ("derived.yaml", DERIVED_FIELDS_YAML),
            ("surface.json", SURFACE_FIELDS_JSON),
        ],
    )?;
    write_files(&root.path().join("models"), &[("hrrr.yaml", MODEL_CONFIG_YAML)])?;
    Ok(root)
}
