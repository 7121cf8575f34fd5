//! Field rendering to indexed PNG plus a JSON sidecar.
//!
//! Values are shaded by the field's level bins: each interval between two
//! consecutive levels gets one palette entry, with extra entries below the
//! first and above the last level when the field extends that way. NaN and
//! out-of-range cells are transparent.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use field_config::{Extend, ResolvedFieldConfig};
use rayon::prelude::*;
use serde_json::json;
use wx_common::{Grid, StepKey};

use crate::layout::OutputLayout;

/// Minimum cells before binning runs in parallel.
const PARALLEL_THRESHOLD: usize = 4096;

/// Palette entries are `(r, g, b, a)`.
pub type Rgba = (u8, u8, u8, u8);

const TRANSPARENT: Rgba = (0, 0, 0, 0);

/// Everything needed to render one field of one step.
pub struct RenderRequest<'a> {
    pub grid: &'a Grid,
    pub config: &'a ResolvedFieldConfig,
    pub step: &'a StepKey,
    pub output_dir: &'a Path,
}

/// Files written for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedArtifact {
    pub field: String,
    pub image: PathBuf,
    pub sidecar: PathBuf,
    pub bytes: u64,
}

/// Turns a grid into files on disk. Runs on the blocking pool.
pub trait Renderer: Send + Sync {
    fn render(&self, request: &RenderRequest<'_>) -> Result<RenderedArtifact>;
}

/// Resolves a colormap name to `count` colors.
pub trait StyleProvider: Send + Sync {
    fn palette(&self, colormap: &str, count: usize) -> Vec<Rgba>;
}

/// A handful of named ramps, linearly interpolated. Unknown names fall back
/// to grayscale.
#[derive(Debug, Clone)]
pub struct BuiltinStyles {
    ramps: BTreeMap<String, Vec<(u8, u8, u8)>>,
}

impl Default for BuiltinStyles {
    fn default() -> Self {
        let ramps = [
            ("viridis", &["#440154", "#3b528b", "#21918c", "#5ec962", "#fde725"][..]),
            ("plasma", &["#0d0887", "#7e03a8", "#cc4778", "#f89540", "#f0f921"][..]),
            ("RdBu_r", &["#053061", "#4393c3", "#f7f7f7", "#d6604d", "#67001f"][..]),
            ("Blues", &["#f7fbff", "#6baed6", "#08306b"][..]),
            ("Reds", &["#fff5f0", "#fb6a4a", "#67000d"][..]),
            ("Greens", &["#f7fcf5", "#74c476", "#00441b"][..]),
            ("YlOrRd", &["#ffffcc", "#feb24c", "#f03b20", "#800026"][..]),
            ("gray", &["#000000", "#ffffff"][..]),
        ]
        .into_iter()
        .map(|(name, stops)| {
            let stops = stops.iter().filter_map(|h| hex_to_rgb(h)).collect();
            (name.to_string(), stops)
        })
        .collect();
        Self { ramps }
    }
}

impl StyleProvider for BuiltinStyles {
    fn palette(&self, colormap: &str, count: usize) -> Vec<Rgba> {
        let stops = self
            .ramps
            .get(colormap)
            .or_else(|| self.ramps.get("gray"))
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        sample_ramp(stops, count)
    }
}

/// Parse `#rrggbb`.
pub fn hex_to_rgb(hex: &str) -> Option<(u8, u8, u8)> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some((r, g, b))
}

fn sample_ramp(stops: &[(u8, u8, u8)], count: usize) -> Vec<Rgba> {
    match stops {
        [] => vec![(128, 128, 128, 255); count],
        [only] => vec![(only.0, only.1, only.2, 255); count],
        _ => (0..count)
            .map(|i| {
                let t = if count > 1 { i as f32 / (count - 1) as f32 } else { 0.0 };
                let pos = t * (stops.len() - 1) as f32;
                let lo = (pos.floor() as usize).min(stops.len() - 2);
                let frac = pos - lo as f32;
                let lerp = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * frac).round() as u8;
                let (a, b) = (stops[lo], stops[lo + 1]);
                (lerp(a.0, b.0), lerp(a.1, b.1), lerp(a.2, b.2), 255)
            })
            .collect(),
    }
}

/// Bin edges and extension flags of one field.
#[derive(Debug, Clone, PartialEq)]
struct Bins {
    edges: Vec<f32>,
    below: bool,
    above: bool,
}

impl Bins {
    fn new(config: &ResolvedFieldConfig, grid: &Grid) -> Self {
        let mut edges: Vec<f32> = config.levels.iter().map(|l| *l as f32).collect();
        edges.sort_by(|a, b| a.total_cmp(b));
        edges.dedup();
        if edges.len() < 2 {
            let (lo, hi) = grid.min_max().unwrap_or((0.0, 1.0));
            let hi = if hi > lo { hi } else { lo + 1.0 };
            edges = (0..=10).map(|i| lo + (hi - lo) * i as f32 / 10.0).collect();
        }
        let (below, above) = match config.extend {
            Extend::Neither => (false, false),
            Extend::Min => (true, false),
            Extend::Max => (false, true),
            Extend::Both => (true, true),
        };
        Self { edges, below, above }
    }

    /// Colors needed, excluding the transparent entry.
    fn color_count(&self) -> usize {
        self.edges.len() - 1 + self.below as usize + self.above as usize
    }

    /// Palette index of `value`; 0 is transparent.
    fn index(&self, value: f32) -> u8 {
        if value.is_nan() {
            return 0;
        }
        let n = self.edges.len();
        let first = self.edges[0];
        let last = self.edges[n - 1];
        let offset = 1 + self.below as usize;

        let index = if value < first {
            if self.below {
                1
            } else {
                0
            }
        } else if value > last || (value == last && self.above) {
            if self.above {
                offset + n - 1
            } else {
                0
            }
        } else {
            // Last interval is closed on the right.
            let interval = self.edges[1..]
                .iter()
                .position(|edge| value < *edge)
                .unwrap_or(n - 2);
            offset + interval
        };
        index.min(u8::MAX as usize) as u8
    }
}

/// Indexed PNG renderer.
pub struct PngRenderer {
    styles: Arc<dyn StyleProvider>,
}

impl PngRenderer {
    pub fn new(styles: Arc<dyn StyleProvider>) -> Self {
        Self { styles }
    }
}

impl Renderer for PngRenderer {
    fn render(&self, request: &RenderRequest<'_>) -> Result<RenderedArtifact> {
        let RenderRequest {
            grid,
            config,
            step,
            output_dir,
        } = *request;

        let plane = leading_plane(grid)?;
        let grid = &plane;
        let (height, width) = grid
            .spatial_shape()
            .ok_or_else(|| anyhow!("grid {} has no spatial axes", grid.name))?;
        if width == 0 || height == 0 {
            bail!("grid {} is empty", grid.name);
        }

        let bins = Bins::new(config, grid);
        if bins.color_count() > 255 {
            bail!("field {} has too many level bins", config.name);
        }
        let mut palette = vec![TRANSPARENT];
        palette.extend(self.styles.palette(&config.colormap, bins.color_count()));

        let indices: Vec<u8> = if grid.data.len() >= PARALLEL_THRESHOLD {
            grid.data.par_iter().map(|v| bins.index(*v)).collect()
        } else {
            grid.data.iter().map(|v| bins.index(*v)).collect()
        };
        let png = create_png_indexed(width, height, &palette, &indices)?;

        fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;
        let fhr = step.forecast_hour;
        let image = output_dir.join(OutputLayout::artifact_name(&config.name, fhr));
        let sidecar = output_dir.join(OutputLayout::sidecar_name(&config.name, fhr));

        let (min, max) = grid
            .min_max()
            .map(|(lo, hi)| (json!(lo), json!(hi)))
            .unwrap_or((json!(null), json!(null)));
        let metadata = json!({
            "field": config.name,
            "title": config.title,
            "units": config.units,
            "colormap": config.colormap,
            "levels": config.levels,
            "extend": config.extend,
            "model": step.run.model,
            "cycle": step.run.cycle_str(),
            "forecast_hour": fhr,
            "valid_time": step.valid_time().to_rfc3339(),
            "shape": [height, width],
            "min": min,
            "max": max,
            "derived": grid.attrs.get("derived").cloned().unwrap_or(json!(false)),
            "plot_style": config.plot_style.as_ref().map(|s| s.as_str()),
            "composite_inputs": grid.attrs.get("composite_inputs"),
        });

        // Sidecar first so a finished image always has its metadata.
        write_atomic(&sidecar, serde_json::to_vec_pretty(&metadata)?.as_slice())?;
        write_atomic(&image, &png)?;

        Ok(RenderedArtifact {
            field: config.name.clone(),
            image,
            sidecar,
            bytes: png.len() as u64,
        })
    }
}

/// The first 2-D plane of `grid`, selecting index 0 along leading axes.
fn leading_plane(grid: &Grid) -> Result<Grid> {
    let mut plane = grid.clone();
    while plane.ndim() > 2 {
        let axis = plane.axes[0].name.clone();
        plane = plane.select(&axis, 0)?;
    }
    if plane.ndim() < 2 {
        bail!("grid {} is not 2-D: {:?}", grid.name, grid.shape());
    }
    Ok(plane)
}

/// Write to a hidden temporary next to `path`, then rename.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("invalid output path {}", path.display()))?;
    let tmp = path.with_file_name(format!(".{}.tmp", name));
    {
        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("Failed to move {} into place", path.display()))
}

/// Indexed PNG (color type 3) from palette and per-pixel indices.
pub fn create_png_indexed(
    width: usize,
    height: usize,
    palette: &[Rgba],
    indices: &[u8],
) -> Result<Vec<u8>> {
    if indices.len() != width * height {
        bail!("expected {} indices, got {}", width * height, indices.len());
    }
    let mut png = Vec::new();
    png.extend_from_slice(&[137, 80, 78, 71, 13, 10, 26, 10]);

    let mut ihdr = Vec::with_capacity(13);
    ihdr.extend_from_slice(&(width as u32).to_be_bytes());
    ihdr.extend_from_slice(&(height as u32).to_be_bytes());
    ihdr.extend_from_slice(&[8, 3, 0, 0, 0]);
    write_chunk(&mut png, b"IHDR", &ihdr);

    let plte: Vec<u8> = palette.iter().flat_map(|(r, g, b, _)| [*r, *g, *b]).collect();
    write_chunk(&mut png, b"PLTE", &plte);

    if palette.iter().any(|(_, _, _, a)| *a < 255) {
        let trns: Vec<u8> = palette.iter().map(|(_, _, _, a)| *a).collect();
        write_chunk(&mut png, b"tRNS", &trns);
    }

    let mut raw = Vec::with_capacity(height * (width + 1));
    for row in indices.chunks_exact(width) {
        raw.push(0);
        raw.extend_from_slice(row);
    }
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::fast());
    encoder.write_all(&raw)?;
    write_chunk(&mut png, b"IDAT", &encoder.finish()?);

    write_chunk(&mut png, b"IEND", &[]);
    Ok(png)
}

fn write_chunk(png: &mut Vec<u8>, chunk_type: &[u8; 4], data: &[u8]) {
    png.extend_from_slice(&(data.len() as u32).to_be_bytes());
    png.extend_from_slice(chunk_type);
    png.extend_from_slice(data);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(chunk_type);
    hasher.update(data);
    png.extend_from_slice(&hasher.finalize().to_be_bytes());
}
