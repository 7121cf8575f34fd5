//! Post-load shaping: layer selection, then reduction to two spatial axes.
//!
//! Both steps are pure and run in this order whichever strategy produced the
//! grid.

use field_config::{LayerSelection, RawFieldConfig};
use tracing::debug;
use wx_common::{Grid, WxError, WxResult};

/// Apply layer selection and dimensional reduction.
pub fn shape(grid: Grid, field: &str, raw: &RawFieldConfig) -> WxResult<Grid> {
    let grid = select_layer(grid, field, raw)?;
    reduce_to_spatial(grid)
}

/// Pick one layer of a grid with more than two axes.
///
/// - `level_selection {bottom, top}`: the layer whose coordinate is `top`,
///   else the closest one.
/// - `level_selection <index>`: that layer, else the last.
/// - `process: select_layer`: the first layer for `01km` fields, else the last.
/// - A `heightAboveGround` axis: the level closest to the access `level`,
///   else the first.
pub fn select_layer(grid: Grid, field: &str, raw: &RawFieldConfig) -> WxResult<Grid> {
    if grid.ndim() <= 2 {
        return Ok(grid);
    }

    let level_axis = match grid.axes.iter().position(|a| !a.is_spatial()) {
        Some(position) => grid.axes[position].clone(),
        None => return Ok(grid),
    };
    let last = level_axis.len().saturating_sub(1);

    let (axis, index) = if let Some(selection) = &raw.layer_selection {
        let index = match selection {
            LayerSelection::Range { top, .. } => level_axis
                .position(*top)
                .or_else(|| level_axis.closest_index(*top))
                .unwrap_or(0),
            LayerSelection::Index(i) => match usize::try_from(*i) {
                Ok(i) if i < level_axis.len() => i,
                _ => last,
            },
        };
        (level_axis.name, index)
    } else if raw.process.as_deref() == Some("select_layer") {
        let index = if field.contains("01km") { 0 } else { last };
        (level_axis.name, index)
    } else if let Some(height) = grid.axis("heightAboveGround") {
        let index = raw
            .access_level()
            .and_then(|level| height.closest_index(level))
            .unwrap_or(0);
        (height.name.clone(), index)
    } else {
        return Ok(grid);
    };

    debug!(field = %field, axis = %axis, index = index, "Selected layer");
    grid.select(&axis, index)
}

/// Collapse leading non-spatial axes at index 0 until two remain.
pub fn reduce_to_spatial(mut grid: Grid) -> WxResult<Grid> {
    while grid.ndim() > 2 {
        let axis = grid
            .first_non_spatial_axis()
            .map(str::to_string)
            .ok_or_else(|| WxError::NotSpatial(grid.axis_names().join(", ")))?;
        grid = grid.select(&axis, 0)?;
    }
    if grid.ndim() < 2 {
        return Err(WxError::NotSpatial(grid.axis_names().join(", ")));
    }
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use test_utils::stacked_grid;

    fn raw(layer_selection: Option<LayerSelection>, process: Option<&str>) -> RawFieldConfig {
        RawFieldConfig {
            access: BTreeMap::new(),
            var: "x".to_string(),
            requires_multi_dataset: false,
            extraction_hint: None,
            shortname_aliases: Vec::new(),
            layer_selection,
            process: process.map(str::to_string),
        }
    }

    fn layers() -> Grid {
        stacked_grid(
            "uh",
            "heightAboveGroundLayer",
            &[(5000.0, 1.0), (3000.0, 2.0), (2000.0, 3.0)],
            2,
            2,
        )
    }

    #[test]
    fn test_range_selection_exact_then_closest() {
        let exact = Some(LayerSelection::Range {
            bottom: 0.0,
            top: 3000.0,
        });
        let grid = shape(layers(), "uh", &raw(exact, None)).unwrap();
        assert_eq!(grid.data, vec![2.0; 4]);

        let closest = Some(LayerSelection::Range {
            bottom: 0.0,
            top: 4500.0,
        });
        let grid = shape(layers(), "uh", &raw(closest, None)).unwrap();
        assert_eq!(grid.data, vec![1.0; 4]);
    }

    #[test]
    fn test_index_selection_falls_back_to_last() {
        let grid = shape(layers(), "uh", &raw(Some(LayerSelection::Index(1)), None)).unwrap();
        assert_eq!(grid.data, vec![2.0; 4]);

        let grid = shape(layers(), "uh", &raw(Some(LayerSelection::Index(7)), None)).unwrap();
        assert_eq!(grid.data, vec![3.0; 4]);
    }

    #[test]
    fn test_select_layer_process() {
        let grid = shape(layers(), "srh_01km", &raw(None, Some("select_layer"))).unwrap();
        assert_eq!(grid.data, vec![1.0; 4]);

        let grid = shape(layers(), "srh_03km", &raw(None, Some("select_layer"))).unwrap();
        assert_eq!(grid.data, vec![3.0; 4]);
    }

    #[test]
    fn test_height_above_ground_closest_to_access_level() {
        let grid = stacked_grid(
            "mdens",
            "heightAboveGround",
            &[(2.0, 1.0), (8.0, 2.0), (1000.0, 3.0)],
            2,
            2,
        );
        let mut config = raw(None, None);
        config.access.insert("level".to_string(), json!(8));

        let grid = shape(grid, "smoke", &config).unwrap();
        assert_eq!(grid.data, vec![2.0; 4]);
        assert_eq!(grid.attrs["heightAboveGround"], 8.0);
    }

    #[test]
    fn test_single_level_reduces_to_lat_lon() {
        let grid = stacked_grid("t", "level", &[(1.0, 300.0)], 3, 4);
        assert_eq!(grid.shape(), vec![1, 3, 4]);

        let reduced = shape(grid, "t", &raw(None, None)).unwrap();
        assert_eq!(reduced.axis_names(), vec!["latitude", "longitude"]);
        assert_eq!(reduced.shape(), vec![3, 4]);
    }
}
