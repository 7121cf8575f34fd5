//! GRIB2 reader (WMO FM 92 GRIB Edition 2).
//!
//! Parses the section structure of each message, exposes the product keys the
//! field configuration speaks in (`typeOfLevel`, `stepType`, `level`,
//! `paramId`), and unpacks values. Simple packing is decoded natively; other
//! packings are handed to the `grib` crate.

pub mod keys;
pub mod message;
pub mod sections;
pub mod tables;
pub mod unpacking;

use thiserror::Error;

pub use message::{Grib2Message, Grib2Reader};
pub use tables::{Grib2Tables, LevelDescription};
pub use unpacking::unpack_simple;

#[derive(Debug, Error)]
pub enum Grib2Error {
    #[error("Invalid GRIB2 format: {0}")]
    InvalidFormat(String),

    #[error("Invalid section {section}: {reason}")]
    InvalidSection { section: u8, reason: String },

    #[error("Unpacking error: {0}")]
    UnpackingError(String),

    #[error("Unsupported packing template {0}")]
    UnsupportedPacking(u16),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Grib2Error>;
