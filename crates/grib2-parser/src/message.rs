//! Message framing and per-message accessors.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::keys;
use crate::sections::{
    self, builtin_long_name, Bitmap, DataRepresentation, DataSection, GridDefinition,
    Identification, Indicator, ProductDefinition,
};
use crate::tables::Grib2Tables;
use crate::unpacking::{unpack_simple, unpack_with_grib_crate};
use crate::{Grib2Error, Result};

/// One GRIB2 message (a single field on a single level).
#[derive(Debug, Clone)]
pub struct Grib2Message {
    pub indicator: Indicator,
    pub identification: Identification,
    pub grid_definition: GridDefinition,
    pub product_definition: ProductDefinition,
    pub data_representation: DataRepresentation,
    pub bitmap: Option<Bitmap>,
    pub data_section: DataSection,
    /// Complete message bytes, "GRIB" through "7777".
    pub raw: Bytes,
}

impl Grib2Message {
    pub fn parse(raw: Bytes, tables: &Grib2Tables) -> Result<Self> {
        let indicator = sections::parse_indicator(&raw)?;
        let identification = sections::parse_identification(&raw)?;
        let grid_definition = sections::parse_grid_definition(&raw)?;
        let product_definition =
            sections::parse_product_definition(&raw, indicator.discipline, tables)?;
        let data_representation = sections::parse_data_representation(&raw)?;
        let bitmap = sections::parse_bitmap(&raw)?;
        let data_section = sections::parse_data_section(&raw)?;

        Ok(Self {
            indicator,
            identification,
            grid_definition,
            product_definition,
            data_representation,
            bitmap,
            data_section,
            raw,
        })
    }

    /// NCEP abbreviation, e.g. `TMP`.
    pub fn parameter(&self) -> &str {
        &self.product_definition.parameter_short_name
    }

    /// Parameter long name, `unknown` when not in the built-in table.
    pub fn parameter_name(&self) -> &'static str {
        let pd = &self.product_definition;
        builtin_long_name(
            self.indicator.discipline,
            pd.parameter_category,
            pd.parameter_number,
        )
        .unwrap_or("unknown")
    }

    /// (rows, cols)
    pub fn grid_dims(&self) -> (usize, usize) {
        (
            self.grid_definition.num_points_latitude as usize,
            self.grid_definition.num_points_longitude as usize,
        )
    }

    pub fn type_of_level(&self) -> &'static str {
        keys::type_of_level(
            &self.product_definition.first_surface,
            &self.product_definition.second_surface,
        )
    }

    pub fn step_type(&self) -> &'static str {
        keys::step_type(
            self.product_definition.template_number,
            self.product_definition.statistical_process,
        )
    }

    pub fn level(&self) -> f64 {
        keys::level(&self.product_definition.first_surface)
    }

    pub fn short_name(&self) -> Option<&'static str> {
        let pd = &self.product_definition;
        keys::short_name(
            self.indicator.discipline,
            pd.parameter_category,
            pd.parameter_number,
            &pd.first_surface,
        )
    }

    pub fn param_id(&self) -> Option<u32> {
        let pd = &self.product_definition;
        keys::param_id(
            self.indicator.discipline,
            pd.parameter_category,
            pd.parameter_number,
            &pd.first_surface,
        )
    }

    pub fn forecast_hour(&self) -> u32 {
        self.product_definition.forecast_hour
    }

    /// Decode every grid point. Bitmapped-out points are NaN.
    pub fn unpack_data(&self) -> Result<Vec<f32>> {
        let dr = &self.data_representation;
        let expected = self.grid_definition.num_points as usize;

        let values = match dr.template_number {
            0 => unpack_simple(
                &self.data_section.data,
                self.grid_definition.num_points,
                dr.bits_per_value,
                dr.reference_value,
                dr.binary_scale_factor,
                dr.decimal_scale_factor,
                self.bitmap.as_ref().map(|b| &b.data[..]),
            )?
            .into_iter()
            .map(|v| v.unwrap_or(f32::NAN))
            .collect(),
            2 | 3 | 40 | 41 => {
                trace!(template = dr.template_number, "Decoding via grib crate");
                unpack_with_grib_crate(&self.raw)?
            }
            other => return Err(Grib2Error::UnsupportedPacking(other)),
        };

        if values.len() != expected {
            return Err(Grib2Error::UnpackingError(format!(
                "decoded {} values for a grid of {} points",
                values.len(),
                expected
            )));
        }

        Ok(values)
    }
}

/// Sequential reader over the messages of one container.
pub struct Grib2Reader {
    data: Bytes,
    offset: usize,
    tables: Arc<Grib2Tables>,
}

impl Grib2Reader {
    pub fn new(data: Bytes, tables: Arc<Grib2Tables>) -> Self {
        Self {
            data,
            offset: 0,
            tables,
        }
    }

    /// Next message, or `None` once no further "GRIB" marker exists.
    pub fn next_message(&mut self) -> Result<Option<Grib2Message>> {
        let start = match find_magic(&self.data[self.offset..]) {
            Some(pos) => self.offset + pos,
            None => {
                self.offset = self.data.len();
                return Ok(None);
            }
        };

        let indicator = sections::parse_indicator(&self.data[start..])?;
        let length = indicator.message_length as usize;
        if length < 20 || start + length > self.data.len() {
            return Err(Grib2Error::InvalidFormat(format!(
                "message at offset {} claims {} bytes, {} available",
                start,
                length,
                self.data.len() - start
            )));
        }

        let raw = self.data.slice(start..start + length);
        self.offset = start + length;

        let message = Grib2Message::parse(raw, &self.tables)?;
        debug!(
            offset = start,
            parameter = message.parameter(),
            level = %message.product_definition.level_description,
            "Parsed GRIB2 message"
        );
        Ok(Some(message))
    }

    /// Read every remaining message.
    pub fn read_all(&mut self) -> Result<Vec<Grib2Message>> {
        let mut messages = Vec::new();
        while let Some(message) = self.next_message()? {
            messages.push(message);
        }
        Ok(messages)
    }
}

fn find_magic(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"GRIB")
}
