//! Raw field extraction.
//!
//! Pulls one named quantity out of a large GRIB2 container. A field's access
//! recipe is tried as a direct keyed open first, then through the external
//! `wgrib2` utility when the field carries a match pattern, and finally by
//! searching every sub-dataset. The loaded grid is reduced to two spatial
//! axes and converted to the field's units.

pub mod backend;
pub mod dataset;
pub mod error;
pub mod extractor;
pub mod shaping;
pub mod transform;
pub mod wgrib2;

pub use backend::{decompress_gzip, AccessFilter, ContainerBackend, Grib2Backend, InMemoryBackend};
pub use dataset::{Dataset, Record, RecordKeys, Variable, UNKNOWN_VARIABLE};
pub use error::{ExtractionError, Result};
pub use extractor::{RawExtractor, StrategyTimeouts};
pub use wgrib2::Wgrib2Runner;
