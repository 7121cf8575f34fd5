//! Container backends: open a file and return its records.
//!
//! Backends are synchronous and run inside `spawn_blocking`; they check the
//! cancellation token between records so a timed-out strategy stops early.
//! Record keys are readable without unpacking, so searches decode only the
//! records they return.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use grib2_parser::{Grib2Reader, Grib2Tables};

use crate::dataset::{group_records, Dataset, Record, RecordKeys, Variable};
use crate::error::{ExtractionError, Result};

/// paramIds that address near-surface fields at a fixed height.
const SURFACE_PARAM_IDS: [(u32, f64); 5] = [
    (167, 2.0),
    (168, 2.0),
    (260242, 2.0),
    (165, 10.0),
    (166, 10.0),
];

/// Record filter built from a field's access bag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessFilter {
    pub type_of_level: Option<String>,
    pub step_type: Option<String>,
    /// Any-of level match; empty matches every level.
    pub levels: Vec<f64>,
    pub short_name: Option<String>,
    pub param_id: Option<u32>,
}

impl AccessFilter {
    /// Build a filter from `typeOfLevel`, `stepType`, `level`, `shortName`
    /// and `paramId`. A near-surface paramId without a level type is pinned
    /// to `heightAboveGround` at 2 m or 10 m.
    pub fn from_access(access: &BTreeMap<String, Value>) -> Self {
        let mut filter = AccessFilter {
            type_of_level: access.get("typeOfLevel").and_then(as_text),
            step_type: access.get("stepType").and_then(as_text),
            levels: match access.get("level") {
                Some(Value::Array(items)) => items.iter().filter_map(Value::as_f64).collect(),
                Some(value) => value.as_f64().into_iter().collect(),
                None => Vec::new(),
            },
            short_name: access.get("shortName").and_then(as_text),
            param_id: access
                .get("paramId")
                .and_then(Value::as_u64)
                .and_then(|id| u32::try_from(id).ok()),
        };

        for key in access.keys() {
            if !matches!(
                key.as_str(),
                "typeOfLevel" | "stepType" | "level" | "shortName" | "paramId"
            ) {
                debug!(key = %key, "Ignoring unsupported access key");
            }
        }

        if let Some(id) = filter.param_id {
            if filter.type_of_level.is_none() {
                if let Some((_, height)) = SURFACE_PARAM_IDS.iter().find(|(p, _)| *p == id) {
                    filter.type_of_level = Some("heightAboveGround".to_string());
                    filter.levels = vec![*height];
                }
            }
        }

        filter
    }

    pub fn matches(&self, keys: &RecordKeys) -> bool {
        if let Some(t) = &self.type_of_level {
            if *t != keys.type_of_level {
                return false;
            }
        }
        if let Some(s) = &self.step_type {
            if *s != keys.step_type {
                return false;
            }
        }
        if !self.levels.is_empty() && !self.levels.iter().any(|l| (l - keys.level).abs() < 1e-6) {
            return false;
        }
        if let Some(name) = &self.short_name {
            if *name != keys.name {
                return false;
            }
        }
        if let Some(id) = self.param_id {
            if keys.param_id != Some(id) {
                return false;
            }
        }
        true
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Opens containers. Implementations must be cheap to share across threads.
pub trait ContainerBackend: Send + Sync + 'static {
    /// Keys of every record in `path`, in file order, without unpacking.
    fn scan_keys(&self, path: &Path, cancel: &CancellationToken) -> Result<Vec<RecordKeys>>;

    /// Unpack the records of `path` whose keys satisfy `select`.
    fn read_where(
        &self,
        path: &Path,
        select: &dyn Fn(&RecordKeys) -> bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>>;

    /// Records of `path`, restricted to `filter` when given.
    fn read_records(
        &self,
        path: &Path,
        filter: Option<&AccessFilter>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>> {
        self.read_where(
            path,
            &|keys: &RecordKeys| filter.map(|f| f.matches(keys)).unwrap_or(true),
            cancel,
        )
    }

    /// One dataset holding every record that matches `filter`.
    fn open_filtered(
        &self,
        path: &Path,
        filter: &AccessFilter,
        cancel: &CancellationToken,
    ) -> Result<Dataset> {
        let records = self.read_records(path, Some(filter), cancel)?;
        let type_of_level = filter
            .type_of_level
            .clone()
            .or_else(|| records.first().map(|r| r.keys.type_of_level.clone()))
            .unwrap_or_default();
        let step_type = filter
            .step_type
            .clone()
            .or_else(|| records.first().map(|r| r.keys.step_type.clone()))
            .unwrap_or_default();
        Ok(Dataset::from_records(type_of_level, step_type, records)?)
    }

    /// Every sub-dataset, grouped by level type and step type.
    fn open_all(&self, path: &Path, cancel: &CancellationToken) -> Result<Vec<Dataset>> {
        let records = self.read_records(path, None, cancel)?;
        Ok(group_records(records)?)
    }

    /// First variable matching `var` (see [`RecordKeys::matches_search`]),
    /// checking one sub-dataset at a time in first-seen order. Only the
    /// records of the matching variable are unpacked.
    fn search(
        &self,
        path: &Path,
        var: &str,
        aliases: &[String],
        cancel: &CancellationToken,
    ) -> Result<Option<Variable>> {
        let keys = self.scan_keys(path, cancel)?;
        let mut groups: Vec<(&str, &str)> = Vec::new();
        for k in &keys {
            let group = (k.type_of_level.as_str(), k.step_type.as_str());
            if !groups.contains(&group) {
                groups.push(group);
            }
        }

        for (type_of_level, step_type) in groups {
            let in_group =
                |k: &RecordKeys| k.type_of_level == type_of_level && k.step_type == step_type;
            let Some(hit) = keys
                .iter()
                .find(|&k| in_group(k) && k.matches_search(var, aliases))
            else {
                continue;
            };

            let records = self.read_where(
                path,
                &|k: &RecordKeys| {
                    in_group(k) && k.name == hit.name && k.grib_short_name == hit.grib_short_name
                },
                cancel,
            )?;
            let mut dataset = Dataset::from_records(type_of_level, step_type, records)?;
            if let Some(variable) = dataset.take_where(|_| true) {
                debug!(
                    variable = %variable.name,
                    type_of_level = %type_of_level,
                    step_type = %step_type,
                    "Search matched"
                );
                return Ok(Some(variable));
            }
        }
        Ok(None)
    }
}

/// Reads GRIB2 containers, optionally gzip-compressed.
#[derive(Clone)]
pub struct Grib2Backend {
    tables: Arc<Grib2Tables>,
}

impl Grib2Backend {
    pub fn new(tables: Arc<Grib2Tables>) -> Self {
        Self { tables }
    }

    fn read_bytes(path: &Path) -> Result<Bytes> {
        let data = fs::read(path)?;
        let is_gzip = path.extension().and_then(|e| e.to_str()) == Some("gz")
            || data.starts_with(&[0x1f, 0x8b]);
        if is_gzip {
            decompress_gzip(&data)
        } else {
            Ok(Bytes::from(data))
        }
    }
}

impl Default for Grib2Backend {
    fn default() -> Self {
        Self::new(Arc::new(Grib2Tables::new()))
    }
}

impl ContainerBackend for Grib2Backend {
    fn scan_keys(&self, path: &Path, cancel: &CancellationToken) -> Result<Vec<RecordKeys>> {
        let data = Self::read_bytes(path)?;
        let mut reader = Grib2Reader::new(data, self.tables.clone());
        let mut keys = Vec::new();

        while let Some(message) = reader.next_message()? {
            if cancel.is_cancelled() {
                return Err(ExtractionError::Cancelled);
            }
            keys.push(RecordKeys::from_message(&message));
        }
        Ok(keys)
    }

    fn read_where(
        &self,
        path: &Path,
        select: &dyn Fn(&RecordKeys) -> bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>> {
        let data = Self::read_bytes(path)?;
        let mut reader = Grib2Reader::new(data, self.tables.clone());
        let mut records = Vec::new();
        let mut scanned = 0usize;

        while let Some(message) = reader.next_message()? {
            if cancel.is_cancelled() {
                return Err(ExtractionError::Cancelled);
            }
            scanned += 1;

            let keys = RecordKeys::from_message(&message);
            if select(&keys) {
                match Record::from_message(&message) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        warn!(
                            error = %e,
                            parameter = %keys.grib_short_name,
                            "Failed to unpack GRIB2 message, skipping"
                        );
                    }
                }
            }
        }

        debug!(
            path = %path.display(),
            scanned = scanned,
            matched = records.len(),
            "Read container records"
        );
        Ok(records)
    }
}

/// Decompress gzip-compressed GRIB2 data.
pub fn decompress_gzip(data: &[u8]) -> Result<Bytes> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| ExtractionError::Decompression(e.to_string()))?;
    Ok(Bytes::from(decompressed))
}

/// Records held in memory per path. Counts every open and every record
/// handed out.
#[derive(Default)]
pub struct InMemoryBackend {
    files: HashMap<PathBuf, Vec<Record>>,
    opens: AtomicUsize,
    unpacked: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, records: Vec<Record>) -> Self {
        self.files.insert(path.into(), records);
        self
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Records returned by reads so far.
    pub fn unpacked_count(&self) -> usize {
        self.unpacked.load(Ordering::SeqCst)
    }

    fn open(&self, path: &Path, cancel: &CancellationToken) -> Result<&[Record]> {
        if cancel.is_cancelled() {
            return Err(ExtractionError::Cancelled);
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.files
            .get(path)
            .map(Vec::as_slice)
            .ok_or_else(|| ExtractionError::Container(format!("no such container: {}", path.display())))
    }
}

impl ContainerBackend for InMemoryBackend {
    fn scan_keys(&self, path: &Path, cancel: &CancellationToken) -> Result<Vec<RecordKeys>> {
        Ok(self.open(path, cancel)?.iter().map(|r| r.keys.clone()).collect())
    }

    fn read_where(
        &self,
        path: &Path,
        select: &dyn Fn(&RecordKeys) -> bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>> {
        let records: Vec<Record> = self
            .open(path, cancel)?
            .iter()
            .filter(|r| select(&r.keys))
            .cloned()
            .collect();
        self.unpacked.fetch_add(records.len(), Ordering::SeqCst);
        Ok(records)
    }
}
