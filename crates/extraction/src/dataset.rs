//! Records and datasets opened from a container.
//!
//! A [`Record`] is one decoded 2-D message. Records of the same variable at
//! several levels stack into one grid with a leading level axis named after
//! the level type, so `t` on five isobaric levels becomes
//! `(isobaricInhPa, latitude, longitude)`.

use serde_json::json;
use tracing::warn;
use wx_common::{Axis, Grid, WxResult};

use grib2_parser::Grib2Message;

use crate::error::Result;

/// Name given to records without a short name.
pub const UNKNOWN_VARIABLE: &str = "unknown";

/// Addressing keys of one record, available before unpacking.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordKeys {
    /// ecCodes short name, or `unknown`.
    pub name: String,
    /// NCEP abbreviation (`TMP`, `MXUPHL`).
    pub grib_short_name: String,
    pub parameter_name: String,
    pub type_of_level: String,
    pub step_type: String,
    pub level: f64,
    pub param_id: Option<u32>,
}

impl RecordKeys {
    pub fn from_message(message: &Grib2Message) -> Self {
        Self {
            name: message
                .short_name()
                .unwrap_or(UNKNOWN_VARIABLE)
                .to_string(),
            grib_short_name: message.parameter().to_string(),
            parameter_name: message.parameter_name().to_string(),
            type_of_level: message.type_of_level().to_string(),
            step_type: message.step_type().to_string(),
            level: message.level(),
            param_id: message.param_id(),
        }
    }

    /// Whether this record holds `var`: by name, or as an `unknown` variable
    /// whose GRIB short name, parameter name (spaces as `_`) or alias does.
    pub fn matches_search(&self, var: &str, aliases: &[String]) -> bool {
        if self.name == var {
            return true;
        }
        if self.name != UNKNOWN_VARIABLE {
            return false;
        }
        self.grib_short_name == var
            || self.parameter_name.replace(' ', "_") == var
            || aliases.iter().any(|a| *a == self.grib_short_name)
    }
}

/// One decoded message.
#[derive(Debug, Clone)]
pub struct Record {
    pub keys: RecordKeys,
    /// 2-D grid carrying the `GRIB_*` attributes.
    pub grid: Grid,
}

impl Record {
    /// Attach the `GRIB_*` attributes to a 2-D grid.
    pub fn new(keys: RecordKeys, grid: Grid) -> Self {
        let grid = grid
            .with_attr("GRIB_shortName", keys.grib_short_name.clone())
            .with_attr("GRIB_parameterName", keys.parameter_name.clone())
            .with_attr("GRIB_typeOfLevel", keys.type_of_level.clone())
            .with_attr("GRIB_stepType", keys.step_type.clone())
            .with_attr("GRIB_paramId", json!(keys.param_id))
            .with_attr("long_name", keys.parameter_name.clone());
        Self { keys, grid }
    }

    /// Unpack a message into a record.
    pub fn from_message(message: &Grib2Message) -> Result<Self> {
        let keys = RecordKeys::from_message(message);
        let (ny, nx) = message.grid_dims();
        let values = message.unpack_data()?;

        let gd = &message.grid_definition;
        let grid = match (gd.latitudes(), gd.longitudes()) {
            (Some(latitude), Some(longitude)) => Grid::new(
                keys.name.clone(),
                vec![
                    Axis::new("latitude", latitude.clone()),
                    Axis::new("longitude", longitude.clone()),
                ],
                values,
            )?
            .with_coordinates(wx_common::Coordinates {
                latitude,
                longitude,
            }),
            _ => Grid::spatial(keys.name.clone(), ny, nx, values)?,
        };

        Ok(Self::new(keys, grid))
    }
}

/// A named variable within a dataset.
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub grid: Grid,
}

impl Variable {
    pub fn grib_short_name(&self) -> Option<&str> {
        self.grid.attr_str("GRIB_shortName")
    }

    pub fn grib_parameter_name(&self) -> Option<&str> {
        self.grid.attr_str("GRIB_parameterName")
    }

    pub fn is_unknown(&self) -> bool {
        self.name == UNKNOWN_VARIABLE
    }
}

/// Variables sharing one level type and step type.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub type_of_level: String,
    pub step_type: String,
    pub variables: Vec<Variable>,
}

impl Dataset {
    /// Group records into variables, stacking levels. Records are kept in
    /// first-seen order; a repeated level of the same variable is dropped.
    pub fn from_records(
        type_of_level: impl Into<String>,
        step_type: impl Into<String>,
        records: Vec<Record>,
    ) -> WxResult<Self> {
        let type_of_level = type_of_level.into();
        let mut groups: Vec<((String, String), Vec<Record>)> = Vec::new();

        for record in records {
            let key = (
                record.keys.name.clone(),
                record.keys.grib_short_name.clone(),
            );
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => {
                    if members.iter().all(|m| m.keys.level != record.keys.level) {
                        members.push(record);
                    }
                }
                None => groups.push((key, vec![record])),
            }
        }

        let variables = groups
            .into_iter()
            .map(|((name, _), members)| {
                stack_levels(&type_of_level, members).map(|grid| Variable { name, grid })
            })
            .collect::<WxResult<Vec<_>>>()?;

        Ok(Self {
            type_of_level,
            step_type: step_type.into(),
            variables,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn variable_names(&self) -> Vec<&str> {
        self.variables.iter().map(|v| v.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Remove and return the first variable matching `predicate`.
    pub fn take_where(&mut self, predicate: impl Fn(&Variable) -> bool) -> Option<Variable> {
        let index = self.variables.iter().position(predicate)?;
        Some(self.variables.remove(index))
    }
}

/// Group records by level type and step type, in first-seen order.
pub fn group_records(records: Vec<Record>) -> WxResult<Vec<Dataset>> {
    let mut groups: Vec<((String, String), Vec<Record>)> = Vec::new();
    for record in records {
        let key = (
            record.keys.type_of_level.clone(),
            record.keys.step_type.clone(),
        );
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(record),
            None => groups.push((key, vec![record])),
        }
    }

    groups
        .into_iter()
        .map(|((type_of_level, step_type), records)| {
            Dataset::from_records(type_of_level, step_type, records)
        })
        .collect()
}

fn stack_levels(type_of_level: &str, mut members: Vec<Record>) -> WxResult<Grid> {
    if members.len() == 1 {
        let record = members.remove(0);
        return Ok(record.grid.with_attr(type_of_level, record.keys.level));
    }

    let first = members.remove(0);
    let shape = first.grid.shape();
    let mut levels = vec![first.keys.level];
    let mut data = first.grid.data.clone();

    for member in members {
        if member.grid.shape() != shape {
            warn!(
                variable = %member.keys.name,
                level = member.keys.level,
                "Skipping record with mismatched grid shape"
            );
            continue;
        }
        levels.push(member.keys.level);
        data.extend_from_slice(&member.grid.data);
    }

    let mut axes = vec![Axis::new(type_of_level, levels)];
    axes.extend(first.grid.axes.iter().cloned());

    let mut stacked = Grid::new(first.grid.name.clone(), axes, data)?;
    stacked.coordinates = first.grid.coordinates.clone();
    stacked.attrs = first.grid.attrs.clone();
    Ok(stacked)
}
