//! Synthetic GRIB2 messages.
//!
//! Messages use a regular lat/lon grid (template 3.0), product template 4.0
//! (or 4.8 when a statistical process is set) and simple packing at 16 bits.

/// Builder for one GRIB2 message.
#[derive(Debug, Clone)]
pub struct Grib2Builder {
    discipline: u8,
    center: u16,
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    ni: u32,
    nj: u32,
    /// First grid point, microdegrees
    la1: i32,
    lo1: i32,
    /// Grid spacing, microdegrees
    increment: u32,
    param_category: u8,
    param_number: u8,
    first_surface: (u8, u32),
    second_surface: Option<(u8, u32)>,
    forecast_hour: u32,
    statistical_process: Option<u8>,
    data_values: Vec<f32>,
}

impl Default for Grib2Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Grib2Builder {
    /// 2 m temperature at 288.15 K on a 4x3 one-degree grid at 45N 100W.
    pub fn new() -> Self {
        let (ni, nj) = (4, 3);
        Self {
            discipline: 0,
            center: 7,
            year: 2025,
            month: 12,
            day: 10,
            hour: 12,
            ni,
            nj,
            la1: 45_000_000,
            lo1: 260_000_000,
            increment: 1_000_000,
            param_category: 0,
            param_number: 0,
            first_surface: (103, 2),
            second_surface: None,
            forecast_hour: 0,
            statistical_process: None,
            data_values: vec![288.15; (ni * nj) as usize],
        }
    }

    pub fn with_reference_time(mut self, year: u16, month: u8, day: u8, hour: u8) -> Self {
        self.year = year;
        self.month = month;
        self.day = day;
        self.hour = hour;
        self
    }

    pub fn with_grid(mut self, ni: u32, nj: u32) -> Self {
        self.ni = ni;
        self.nj = nj;
        self.data_values = vec![0.0; (ni * nj) as usize];
        self
    }

    pub fn with_parameter(mut self, category: u8, number: u8) -> Self {
        self.param_category = category;
        self.param_number = number;
        self
    }

    /// Single fixed surface, scaled value with scale factor 0.
    pub fn with_level(mut self, level_type: u8, level_value: u32) -> Self {
        self.first_surface = (level_type, level_value);
        self.second_surface = None;
        self
    }

    /// Layer between two fixed surfaces (top first).
    pub fn with_layer(mut self, first: (u8, u32), second: (u8, u32)) -> Self {
        self.first_surface = first;
        self.second_surface = Some(second);
        self
    }

    pub fn with_forecast_hour(mut self, hour: u32) -> Self {
        self.forecast_hour = hour;
        self
    }

    /// Switch to product template 4.8 with the given statistical process
    /// (0 average, 1 accumulation, 2 maximum, 3 minimum).
    pub fn with_statistical_process(mut self, process: u8) -> Self {
        self.statistical_process = Some(process);
        self
    }

    pub fn with_constant_value(mut self, value: f32) -> Self {
        self.data_values = vec![value; (self.ni * self.nj) as usize];
        self
    }

    /// Values rising linearly from `min_val` across the grid.
    pub fn with_gradient(mut self, min_val: f32, max_val: f32) -> Self {
        let n = (self.ni * self.nj) as usize;
        self.data_values = (0..n)
            .map(|i| min_val + (max_val - min_val) * (i as f32 / n as f32))
            .collect();
        self
    }

    pub fn with_data(mut self, data: Vec<f32>) -> Self {
        self.data_values = data;
        self
    }

    /// Complete message bytes, "GRIB" through "7777".
    pub fn build(&self) -> Vec<u8> {
        let sections = [
            self.build_section1(),
            self.build_section3(),
            self.build_section4(),
            self.build_section5(),
            self.build_section6(),
            self.build_section7(),
        ];
        let body_len: usize = sections.iter().map(Vec::len).sum();
        let message_length = 16 + body_len + 4;

        let mut message = Vec::with_capacity(message_length);
        message.extend_from_slice(b"GRIB");
        message.extend_from_slice(&[0, 0]);
        message.push(self.discipline);
        message.push(2);
        message.extend_from_slice(&(message_length as u64).to_be_bytes());
        for section in &sections {
            message.extend_from_slice(section);
        }
        message.extend_from_slice(b"7777");
        message
    }

    fn build_section1(&self) -> Vec<u8> {
        let mut section = Vec::new();
        section.extend_from_slice(&21u32.to_be_bytes());
        section.push(1);
        section.extend_from_slice(&self.center.to_be_bytes());
        section.extend_from_slice(&0u16.to_be_bytes()); // sub-center
        section.push(2); // master table version
        section.push(1); // local table version
        section.push(1); // reference time is start of forecast
        section.extend_from_slice(&self.year.to_be_bytes());
        section.push(self.month);
        section.push(self.day);
        section.push(self.hour);
        section.push(0);
        section.push(0);
        section.push(0); // operational
        section.push(1); // forecast
        section
    }

    fn build_section3(&self) -> Vec<u8> {
        let mut section = Vec::new();
        section.extend_from_slice(&(14u32 + 58).to_be_bytes());
        section.push(3);
        section.push(0);
        section.extend_from_slice(&(self.ni * self.nj).to_be_bytes());
        section.push(0);
        section.push(0);
        section.extend_from_slice(&0u16.to_be_bytes()); // template 3.0

        section.push(6); // spherical earth
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());
        section.extend_from_slice(&self.ni.to_be_bytes());
        section.extend_from_slice(&self.nj.to_be_bytes());
        section.extend_from_slice(&0u32.to_be_bytes()); // basic angle
        section.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());

        let la2 = self.la1 - (self.nj.saturating_sub(1) * self.increment) as i32;
        let lo2 = self.lo1 + (self.ni.saturating_sub(1) * self.increment) as i32;
        section.extend_from_slice(&encode_signed(self.la1));
        section.extend_from_slice(&encode_signed(self.lo1));
        section.push(48);
        section.extend_from_slice(&encode_signed(la2));
        section.extend_from_slice(&encode_signed(lo2));
        section.extend_from_slice(&self.increment.to_be_bytes());
        section.extend_from_slice(&self.increment.to_be_bytes());
        section.push(0); // +i, -j
        section
    }

    fn build_section4(&self) -> Vec<u8> {
        let template: u16 = if self.statistical_process.is_some() { 8 } else { 0 };
        let length: u32 = if template == 8 { 58 } else { 34 };

        let mut section = Vec::new();
        section.extend_from_slice(&length.to_be_bytes());
        section.push(4);
        section.extend_from_slice(&0u16.to_be_bytes());
        section.extend_from_slice(&template.to_be_bytes());
        section.push(self.param_category);
        section.push(self.param_number);
        section.push(2); // forecast
        section.push(0);
        section.push(0);
        section.extend_from_slice(&0u16.to_be_bytes());
        section.push(0);
        section.push(1); // hours
        section.extend_from_slice(&self.forecast_hour.to_be_bytes());

        section.push(self.first_surface.0);
        section.push(0);
        section.extend_from_slice(&self.first_surface.1.to_be_bytes());
        match self.second_surface {
            Some((surface_type, value)) => {
                section.push(surface_type);
                section.push(0);
                section.extend_from_slice(&value.to_be_bytes());
            }
            None => {
                section.push(255);
                section.push(0);
                section.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
            }
        }

        if let Some(process) = self.statistical_process {
            let end_hour = self.hour as u32 + self.forecast_hour;
            section.extend_from_slice(&self.year.to_be_bytes());
            section.push(self.month);
            section.push(self.day);
            section.push((end_hour % 24) as u8);
            section.push(0);
            section.push(0);
            section.push(1); // one time range
            section.extend_from_slice(&0u32.to_be_bytes());
            section.push(process);
            section.push(2); // successive times, forecast time incremented
            section.push(1); // hours
            section.extend_from_slice(&1u32.to_be_bytes());
            section.push(255);
            section.extend_from_slice(&0u32.to_be_bytes());
        }
        section
    }

    fn packing(&self) -> (f32, i16, u8) {
        let (min_val, max_val) = self
            .data_values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = max_val - min_val;
        if range == 0.0 {
            return (min_val, 0, 0);
        }
        // packed = (value - R) / 2^E must fit 16 bits
        let e = (range as f64 / 65535.0).log2().ceil() as i16;
        (min_val, e, 16)
    }

    fn build_section5(&self) -> Vec<u8> {
        let (reference, e, bits) = self.packing();
        let mut section = Vec::new();
        section.extend_from_slice(&21u32.to_be_bytes());
        section.push(5);
        section.extend_from_slice(&(self.ni * self.nj).to_be_bytes());
        section.extend_from_slice(&0u16.to_be_bytes()); // template 5.0
        section.extend_from_slice(&reference.to_be_bytes());
        section.extend_from_slice(&encode_signed_i16(e));
        section.extend_from_slice(&0u16.to_be_bytes()); // D
        section.push(bits);
        section.push(0);
        section
    }

    fn build_section6(&self) -> Vec<u8> {
        let mut section = Vec::new();
        section.extend_from_slice(&6u32.to_be_bytes());
        section.push(6);
        section.push(255);
        section
    }

    fn build_section7(&self) -> Vec<u8> {
        let (reference, e, bits) = self.packing();
        let mut packed = Vec::new();
        if bits > 0 {
            let scale = 2f64.powi(e as i32);
            for &v in &self.data_values {
                let x = ((v as f64 - reference as f64) / scale).round() as u16;
                packed.extend_from_slice(&x.to_be_bytes());
            }
        }

        let mut section = Vec::new();
        section.extend_from_slice(&(5 + packed.len() as u32).to_be_bytes());
        section.push(7);
        section.extend_from_slice(&packed);
        section
    }
}

/// Concatenate messages into one container.
pub fn grib2_container(messages: &[Grib2Builder]) -> Vec<u8> {
    messages.iter().flat_map(|m| m.build()).collect()
}

fn encode_signed(value: i32) -> [u8; 4] {
    let magnitude = value.unsigned_abs() & 0x7FFF_FFFF;
    let raw = if value < 0 {
        magnitude | 0x8000_0000
    } else {
        magnitude
    };
    raw.to_be_bytes()
}

fn encode_signed_i16(value: i16) -> [u8; 2] {
    let magnitude = value.unsigned_abs() & 0x7FFF;
    let raw = if value < 0 { magnitude | 0x8000 } else { magnitude };
    raw.to_be_bytes()
}
