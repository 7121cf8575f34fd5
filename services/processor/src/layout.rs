//! Output and staging directory layouts.
//!
//! ```text
//! outputs/<model>/<YYYYMMDD>/<HH>z/F<fhr>/<field>_f<fhr>.png
//! staging/<model>/<YYYYMMDD>/<HH>z/<category>/<container>
//! staging/<model>/<YYYYMMDD>/<HH>z/F<fhr>/<container>     (linked)
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;
use wx_common::{RunKey, StepKey};

fn run_dir(root: &Path, run: &RunKey) -> PathBuf {
    root.join(&run.model)
        .join(run.date_str())
        .join(format!("{:02}z", run.cycle_hour()))
}

fn step_dir_name(forecast_hour: u32) -> String {
    format!("F{:02}", forecast_hour)
}

/// Where rendered artifacts go.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run: &RunKey) -> PathBuf {
        run_dir(&self.root, run)
    }

    pub fn step_dir(&self, step: &StepKey) -> PathBuf {
        self.run_dir(&step.run).join(step_dir_name(step.forecast_hour))
    }

    pub fn artifact_name(field: &str, forecast_hour: u32) -> String {
        format!("{}_f{:02}.png", field, forecast_hour)
    }

    pub fn sidecar_name(field: &str, forecast_hour: u32) -> String {
        format!("{}_f{:02}.json", field, forecast_hour)
    }

    pub fn artifact_path(&self, step: &StepKey, field: &str) -> PathBuf {
        self.step_dir(step)
            .join(Self::artifact_name(field, step.forecast_hour))
    }

    /// Fields with a finished artifact in the step directory.
    pub fn existing_fields(&self, step: &StepKey) -> BTreeSet<String> {
        let dir = self.step_dir(step);
        let suffix = format!("_f{:02}.png", step.forecast_hour);

        WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(2)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?;
                name.strip_suffix(&suffix)
                    .filter(|field| !field.is_empty())
                    .map(str::to_string)
            })
            .collect()
    }

    /// `requested` minus the fields already rendered, in request order.
    pub fn missing_fields(&self, step: &StepKey, requested: &[String]) -> Vec<String> {
        let existing = self.existing_fields(step);
        requested
            .iter()
            .filter(|f| !existing.contains(*f))
            .cloned()
            .collect()
    }
}

/// Where containers are downloaded and linked per step.
#[derive(Debug, Clone)]
pub struct StagingLayout {
    root: PathBuf,
}

impl StagingLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Central download directory of one run and file category.
    pub fn central_dir(&self, run: &RunKey, category: &str) -> PathBuf {
        run_dir(&self.root, run).join(category)
    }

    /// Working directory of one step.
    pub fn step_dir(&self, step: &StepKey) -> PathBuf {
        run_dir(&self.root, &step.run).join(step_dir_name(step.forecast_hour))
    }

    /// Link `sources` into the step directory, replacing any stale
    /// `.grib2` entries. Returns the staged paths in the same order.
    pub fn stage(&self, step: &StepKey, sources: &[(String, PathBuf)]) -> io::Result<Vec<(String, PathBuf)>> {
        let dir = self.step_dir(step);
        fs::create_dir_all(&dir)?;

        let wanted: BTreeSet<&std::ffi::OsStr> = sources
            .iter()
            .filter_map(|(_, src)| src.file_name())
            .collect();

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_grib = path.extension().map_or(false, |e| e == "grib2");
            let is_wanted = path.file_name().map_or(false, |n| wanted.contains(n));
            if is_grib && !is_wanted {
                debug!(path = %path.display(), "Removing stale staged container");
                fs::remove_file(&path)?;
            }
        }

        let mut staged = Vec::with_capacity(sources.len());
        for (category, src) in sources {
            let name = src.file_name().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, format!("no file name: {}", src.display()))
            })?;
            if !src.is_file() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("missing container: {}", src.display()),
                ));
            }
            let dst = dir.join(name);
            if fs::symlink_metadata(&dst).is_err() {
                link_or_copy(src, &dst)?;
            }
            staged.push((category.clone(), dst));
        }
        Ok(staged)
    }

    /// Containers already staged for a step, by category, for runs that
    /// skip fetching.
    pub fn staged(&self, step: &StepKey, names: &[(String, String)]) -> Vec<(String, PathBuf)> {
        let dir = self.step_dir(step);
        names
            .iter()
            .map(|(category, name)| (category.clone(), dir.join(name)))
            .filter(|(_, path)| path.is_file())
            .collect()
    }
}

/// Hard link, else symlink, else copy.
fn link_or_copy(src: &Path, dst: &Path) -> io::Result<()> {
    if fs::hard_link(src, dst).is_ok() {
        return Ok(());
    }
    #[cfg(unix)]
    {
        if std::os::unix::fs::symlink(src, dst).is_ok() {
            return Ok(());
        }
    }
    warn!(src = %src.display(), "Linking failed, copying container");
    fs::copy(src, dst).map(|_| ())
}
