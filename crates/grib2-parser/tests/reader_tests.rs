//! Reader tests over synthetic messages.

use std::sync::Arc;

use bytes::Bytes;
use grib2_parser::sections::decode_grib2_signed;
use grib2_parser::{Grib2Error, Grib2Reader, Grib2Tables};
use test_utils::{assert_approx_eq, grib2_container, Grib2Builder};

fn reader(data: Vec<u8>) -> Grib2Reader {
    Grib2Reader::new(Bytes::from(data), Arc::new(Grib2Tables::new()))
}

#[test]
fn test_decode_grib2_signed() {
    assert_eq!(decode_grib2_signed(&[0x00, 0x00, 0x03, 0xE8]), 1000);
    assert_eq!(decode_grib2_signed(&[0x80, 0x00, 0x03, 0xE8]), -1000);
    assert_eq!(decode_grib2_signed(&[0x80, 0x00, 0x00, 0x00]), 0);
    assert_eq!(decode_grib2_signed(&[0xFF, 0xFF, 0xFF, 0xFF]), -2147483647);
    assert_eq!(decode_grib2_signed(&[0x00, 0x01]), 0);
}

#[test]
fn test_two_metre_temperature_keys() {
    let data = Grib2Builder::new().with_forecast_hour(6).build();
    let msg = reader(data).next_message().unwrap().unwrap();

    assert_eq!(msg.parameter(), "TMP");
    assert_eq!(msg.parameter_name(), "Temperature");
    assert_eq!(msg.identification.center, 7);
    assert_eq!(msg.type_of_level(), "heightAboveGround");
    assert_eq!(msg.step_type(), "instant");
    assert_eq!(msg.level(), 2.0);
    assert_eq!(msg.short_name(), Some("t2m"));
    assert_eq!(msg.param_id(), Some(167));
    assert_eq!(msg.forecast_hour(), 6);
    assert_eq!(msg.grid_dims(), (3, 4));
}

#[test]
fn test_grid_coordinates() {
    let msg = reader(Grib2Builder::new().build()).next_message().unwrap().unwrap();
    let grid = &msg.grid_definition;

    assert!(grid.is_regular_lat_lon());
    assert_eq!(grid.latitudes().unwrap(), vec![45.0, 44.0, 43.0]);
    assert_eq!(grid.longitudes().unwrap(), vec![260.0, 261.0, 262.0, 263.0]);
}

#[test]
fn test_unpack_gradient() {
    let data = Grib2Builder::new()
        .with_grid(10, 1)
        .with_gradient(0.0, 100.0)
        .build();
    let msg = reader(data).next_message().unwrap().unwrap();
    let values = msg.unpack_data().unwrap();

    assert_eq!(values.len(), 10);
    assert_approx_eq!(values[0], 0.0, 0.01);
    assert_approx_eq!(values[9], 90.0, 0.01);
    assert!(values.windows(2).all(|w| w[1] >= w[0]));
}

#[test]
fn test_unpack_constant_field() {
    let data = Grib2Builder::new().with_constant_value(300.0).build();
    let msg = reader(data).next_message().unwrap().unwrap();
    assert!(msg.unpack_data().unwrap().iter().all(|v| *v == 300.0));
}

#[test]
fn test_statistical_template_step_type() {
    // Hourly max updraft helicity over 5000-2000 m
    let data = Grib2Builder::new()
        .with_parameter(7, 199)
        .with_layer((103, 5000), (103, 2000))
        .with_statistical_process(2)
        .build();
    let msg = reader(data).next_message().unwrap().unwrap();

    assert_eq!(msg.parameter(), "MXUPHL");
    assert_eq!(msg.type_of_level(), "heightAboveGroundLayer");
    assert_eq!(msg.step_type(), "max");
    assert_eq!(msg.level(), 5000.0);
    assert_eq!(msg.short_name(), None);
}

#[test]
fn test_reads_every_message_in_container() {
    let data = grib2_container(&[
        Grib2Builder::new(),
        Grib2Builder::new().with_parameter(7, 6).with_level(1, 0),
        Grib2Builder::new().with_parameter(2, 2).with_level(103, 10),
    ]);
    let messages = reader(data).read_all().unwrap();

    let names: Vec<_> = messages.iter().map(|m| m.parameter().to_string()).collect();
    assert_eq!(names, vec!["TMP", "CAPE", "UGRD"]);
    assert_eq!(messages[1].type_of_level(), "surface");
    assert_eq!(messages[2].param_id(), Some(165));
}

#[test]
fn test_table_overrides_builtin_names() {
    let mut tables = Grib2Tables::new();
    tables.add_parameter(0, 0, 0, "TEMP".to_string());
    let mut reader = Grib2Reader::new(Bytes::from(Grib2Builder::new().build()), Arc::new(tables));

    assert_eq!(reader.next_message().unwrap().unwrap().parameter(), "TEMP");
}

#[test]
fn test_truncated_message_is_an_error() {
    let mut data = Grib2Builder::new().build();
    data.truncate(data.len() - 10);

    assert!(matches!(
        reader(data).next_message(),
        Err(Grib2Error::InvalidFormat(_))
    ));
}

#[test]
fn test_empty_input_has_no_messages() {
    assert!(reader(Vec::new()).next_message().unwrap().is_none());
}
