//! Subset extraction with the external `wgrib2` utility.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::debug;

use crate::error::{ExtractionError, Result};

/// Runs `wgrib2 <file> -match <pattern> -grib <tmp>`.
#[derive(Debug, Clone)]
pub struct Wgrib2Runner {
    binary: PathBuf,
}

impl Default for Wgrib2Runner {
    fn default() -> Self {
        Self::new("wgrib2")
    }
}

impl Wgrib2Runner {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Write the records of `container` matching `pattern` into a temporary
    /// GRIB2 file. The file is removed when the returned handle drops, and
    /// the child is killed if this future is dropped first.
    pub async fn extract_matching(&self, container: &Path, pattern: &str) -> Result<NamedTempFile> {
        let output = tempfile::Builder::new()
            .prefix("wgrib2-")
            .suffix(".grib2")
            .tempfile()?;

        debug!(
            binary = %self.binary.display(),
            container = %container.display(),
            pattern = %pattern,
            "Running wgrib2"
        );

        let result = Command::new(&self.binary)
            .arg(container)
            .arg("-match")
            .arg(pattern)
            .arg("-grib")
            .arg(output.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ExtractionError::Utility(format!("failed to run {}: {}", self.binary.display(), e))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(ExtractionError::Utility(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                result.status,
                stderr.trim()
            )));
        }

        let size = output.as_file().metadata()?.len();
        if size == 0 {
            return Err(ExtractionError::Utility(format!(
                "no records matched '{}'",
                pattern
            )));
        }

        Ok(output)
    }
}
