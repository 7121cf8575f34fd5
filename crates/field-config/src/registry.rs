//! Field registry: loads, resolves and caches every configured field.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::definition::{FieldKind, RawDefinition, ResolvedFieldConfig};
use crate::error::{ConfigError, Result};
use crate::hash::definition_hash;
use crate::template::TemplateResolver;

/// Where field definitions come from.
#[derive(Debug, Clone)]
pub enum FieldStore {
    /// `*.json`, `*.yaml` and `*.yml` maps of name to definition, plus an
    /// optional `templates/` subdirectory.
    Directory(PathBuf),
    InMemory(Vec<(String, RawDefinition)>),
}

/// A field dropped during loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedField {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrySummary {
    pub total_fields: usize,
    pub categories: BTreeMap<String, usize>,
    pub colormaps: BTreeMap<String, usize>,
}

#[derive(Debug, Default)]
struct FieldSet {
    fields: BTreeMap<String, Arc<ResolvedFieldConfig>>,
    rejected: Vec<RejectedField>,
}

#[derive(Default)]
struct RegistryState {
    loaded: Option<Arc<FieldSet>>,
    resolver: Option<Arc<TemplateResolver>>,
    /// Keyed by field name and hash of the raw definition.
    cache: HashMap<(String, String), Arc<ResolvedFieldConfig>>,
}

/// Loads field definitions once and serves resolved configurations.
///
/// The first access loads under the write lock; concurrent first callers
/// wait for that load and share its result.
pub struct FieldRegistry {
    store: FieldStore,
    templates: TemplateResolver,
    known_functions: Option<BTreeSet<String>>,
    state: RwLock<RegistryState>,
}

impl FieldRegistry {
    pub fn new(store: FieldStore) -> Result<Self> {
        Ok(Self::with_templates(store, TemplateResolver::builtin()?))
    }

    pub fn with_templates(store: FieldStore, templates: TemplateResolver) -> Self {
        Self {
            store,
            templates,
            known_functions: None,
            state: RwLock::new(RegistryState::default()),
        }
    }

    pub fn from_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::new(FieldStore::Directory(dir.into()))
    }

    /// Reject derived fields whose function is not in `names`.
    pub fn with_known_functions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_functions = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Load every definition if not already loaded. Returns the field count.
    pub fn load_all(&self) -> Result<usize> {
        Ok(self.fields()?.fields.len())
    }

    /// Drop the loaded set and the resolution cache, then load again.
    pub fn force_reload(&self) -> Result<usize> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.loaded = None;
        state.resolver = None;
        state.cache.clear();
        let set = self.load_locked(&mut state)?;
        Ok(set.fields.len())
    }

    pub fn get(&self, name: &str) -> Result<Arc<ResolvedFieldConfig>> {
        self.fields()?
            .fields
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::FieldNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.fields()?.fields.contains_key(name))
    }

    pub fn field_names(&self) -> Result<Vec<String>> {
        Ok(self.fields()?.fields.keys().cloned().collect())
    }

    pub fn by_category(&self, category: &str) -> Result<Vec<String>> {
        Ok(self
            .fields()?
            .fields
            .iter()
            .filter(|(_, config)| config.category.as_deref() == Some(category))
            .map(|(name, _)| name.clone())
            .collect())
    }

    pub fn categories(&self) -> Result<Vec<String>> {
        let set = self.fields()?;
        let categories: BTreeSet<&str> = set
            .fields
            .values()
            .filter_map(|config| config.category.as_deref())
            .collect();
        Ok(categories.into_iter().map(str::to_string).collect())
    }

    pub fn rejected(&self) -> Result<Vec<RejectedField>> {
        Ok(self.fields()?.rejected.clone())
    }

    /// Case-insensitive match against name, title, variable and category.
    pub fn search(&self, term: &str) -> Result<Vec<String>> {
        let term = term.to_lowercase();
        Ok(self
            .fields()?
            .fields
            .iter()
            .filter(|(name, config)| {
                let var = match &config.kind {
                    FieldKind::Raw(raw) => Some(raw.var.as_str()),
                    FieldKind::Derived(_) => None,
                };
                [
                    Some(name.as_str()),
                    Some(config.title.as_str()),
                    var,
                    config.category.as_deref(),
                ]
                .into_iter()
                .flatten()
                .any(|text| text.to_lowercase().contains(&term))
            })
            .map(|(name, _)| name.clone())
            .collect())
    }

    pub fn summary(&self) -> Result<RegistrySummary> {
        let set = self.fields()?;
        let mut categories = BTreeMap::new();
        let mut colormaps = BTreeMap::new();
        for config in set.fields.values() {
            let category = config.category.as_deref().unwrap_or("uncategorized");
            *categories.entry(category.to_string()).or_insert(0) += 1;
            *colormaps.entry(config.colormap.clone()).or_insert(0) += 1;
        }
        Ok(RegistrySummary {
            total_fields: set.fields.len(),
            categories,
            colormaps,
        })
    }

    /// Write resolved configurations as pretty JSON. Returns the count written.
    pub fn export(&self, path: &Path, category: Option<&str>) -> Result<usize> {
        let set = self.fields()?;
        let selected: BTreeMap<&str, &ResolvedFieldConfig> = set
            .fields
            .iter()
            .filter(|(_, config)| category.is_none() || config.category.as_deref() == category)
            .map(|(name, config)| (name.as_str(), config.as_ref()))
            .collect();

        let json = serde_json::to_string_pretty(&selected).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        info!(path = %path.display(), count = selected.len(), "Exported field configurations");
        Ok(selected.len())
    }

    /// Resolve and register a field. With `persist`, the raw definition is
    /// also written to `<category>.json` in a directory store.
    pub fn add_field(
        &self,
        name: &str,
        definition: RawDefinition,
        persist: bool,
    ) -> Result<Arc<ResolvedFieldConfig>> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let set = self.load_locked(&mut state)?;
        let resolver = self.resolver_locked(&mut state)?;
        let config = self.resolve_cached(&mut state.cache, &resolver, name, &definition)?;

        if persist {
            if let FieldStore::Directory(dir) = &self.store {
                save_definition(dir, name, &definition)?;
            }
        }

        let mut fields = set.fields.clone();
        fields.insert(name.to_string(), config.clone());
        state.loaded = Some(Arc::new(FieldSet {
            fields,
            rejected: set.rejected.clone(),
        }));

        info!(field = %name, "Added field");
        Ok(config)
    }

    /// Remove a field from the loaded set. Returns whether it was present.
    pub fn remove_field(&self, name: &str) -> Result<bool> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let set = self.load_locked(&mut state)?;
        if !set.fields.contains_key(name) {
            return Ok(false);
        }

        let mut fields = set.fields.clone();
        fields.remove(name);
        state.loaded = Some(Arc::new(FieldSet {
            fields,
            rejected: set.rejected.clone(),
        }));
        info!(field = %name, "Removed field");
        Ok(true)
    }

    fn fields(&self) -> Result<Arc<FieldSet>> {
        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(set) = &state.loaded {
                return Ok(set.clone());
            }
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        self.load_locked(&mut state)
    }

    /// Load under an already held write lock. A no-op if another caller
    /// finished the load first.
    fn load_locked(&self, state: &mut RegistryState) -> Result<Arc<FieldSet>> {
        if let Some(set) = &state.loaded {
            return Ok(set.clone());
        }

        let resolver = self.resolver_locked(state)?;
        let definitions = self.read_definitions()?;

        let mut set = FieldSet::default();
        for (name, definition) in definitions {
            match self.resolve_cached(&mut state.cache, &resolver, &name, &definition) {
                Ok(config) => {
                    set.fields.insert(name, config);
                }
                Err(e) => {
                    warn!(field = %name, error = %e, "Rejected field configuration");
                    set.rejected.push(RejectedField {
                        name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            fields = set.fields.len(),
            rejected = set.rejected.len(),
            "Loaded field registry"
        );

        let set = Arc::new(set);
        state.loaded = Some(set.clone());
        Ok(set)
    }

    fn resolver_locked(&self, state: &mut RegistryState) -> Result<Arc<TemplateResolver>> {
        if let Some(resolver) = &state.resolver {
            return Ok(resolver.clone());
        }

        let mut resolver = self.templates.clone();
        if let FieldStore::Directory(dir) = &self.store {
            let templates_dir = dir.join("templates");
            if templates_dir.is_dir() {
                for path in config_files(&templates_dir)? {
                    resolver.extend(read_definition_file(&path)?);
                }
            }
        }

        let resolver = Arc::new(resolver);
        state.resolver = Some(resolver.clone());
        Ok(resolver)
    }

    fn resolve_cached(
        &self,
        cache: &mut HashMap<(String, String), Arc<ResolvedFieldConfig>>,
        resolver: &TemplateResolver,
        name: &str,
        definition: &RawDefinition,
    ) -> Result<Arc<ResolvedFieldConfig>> {
        let key = (
            name.to_string(),
            definition_hash(&Value::Object(definition.clone())),
        );
        if let Some(config) = cache.get(&key) {
            return Ok(config.clone());
        }

        let config = resolver.resolve(name, definition)?;
        if let (Some(known), FieldKind::Derived(derived)) = (&self.known_functions, &config.kind) {
            if !known.contains(&derived.function) {
                return Err(ConfigError::UnknownFunction {
                    field: name.to_string(),
                    function: derived.function.clone(),
                });
            }
        }

        let config = Arc::new(config);
        cache.insert(key, config.clone());
        Ok(config)
    }

    /// Raw definitions in load order; later sources override earlier ones.
    fn read_definitions(&self) -> Result<BTreeMap<String, RawDefinition>> {
        match &self.store {
            FieldStore::InMemory(entries) => Ok(entries.iter().cloned().collect()),
            FieldStore::Directory(dir) => {
                let mut definitions = BTreeMap::new();
                if !dir.is_dir() {
                    warn!(dir = %dir.display(), "Field configuration directory not found");
                    return Ok(definitions);
                }
                for path in config_files(dir)? {
                    match read_definition_file(&path) {
                        Ok(entries) => {
                            debug!(path = %path.display(), count = entries.len(), "Read field file");
                            definitions.extend(entries);
                        }
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "Skipping unreadable field file");
                        }
                    }
                }
                Ok(definitions)
            }
        }
    }
}

/// Configuration files directly inside `dir`, in lexical order.
fn config_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("json" | "yaml" | "yml")
            )
        })
        .collect();
    files.sort();
    Ok(files)
}

fn read_definition_file(path: &Path) -> Result<BTreeMap<String, RawDefinition>> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_str(&content).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    } else {
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn save_definition(dir: &Path, name: &str, definition: &RawDefinition) -> Result<()> {
    let category = definition
        .get("category")
        .and_then(Value::as_str)
        .unwrap_or("custom");
    let path = dir.join(format!("{}.json", category));

    let mut entries = if path.exists() {
        read_definition_file(&path)?
    } else {
        BTreeMap::new()
    };
    entries.insert(name.to_string(), definition.clone());

    let json = serde_json::to_string_pretty(&entries).map_err(|source| ConfigError::Json {
        path: path.clone(),
        source,
    })?;
    fs::write(&path, json).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    debug!(field = %name, path = %path.display(), "Saved field definition");
    Ok(())
}
