use polars::prelude::*;
use taxiflow_core::dataset::PASSENGER_COUNT;
use taxiflow_core::transform::{drop_zero_passengers, fill_missing_passengers, parse_datetime_columns};
use taxiflow_parser::{read_csv, ReadOptions};

fn fixture(name: &str) -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../taxiflow-parser/tests/data")
        .join(name)
}

fn zeros(df: &DataFrame) -> usize {
    df.column(PASSENGER_COUNT)
        .expect("passenger column")
        .i64()
        .expect("int column")
        .into_iter()
        .filter(|value| *value == Some(0))
        .count()
}

#[test]
fn yellow_sample_loses_its_zero_passenger_trip() {
    let df = read_csv(
        fixture("yellow_tripdata_sample.csv"),
        ReadOptions::default().with_datetime_columns(["tpep_pickup_datetime", "tpep_dropoff_datetime"]),
    )
    .expect("read fixture");
    assert_eq!(df.height(), 3);
    assert_eq!(zeros(&df), 1);

    let cleaned = drop_zero_passengers(&df, PASSENGER_COUNT).expect("filter");
    assert_eq!(cleaned.height(), 2);
    assert_eq!(zeros(&cleaned), 0);
    assert_eq!(cleaned.width(), df.width());

    let again = drop_zero_passengers(&cleaned, PASSENGER_COUNT).expect("filter twice");
    assert!(cleaned.equals_missing(&again));
}

#[test]
fn green_sample_fill_removes_nulls_without_dropping_rows() {
    let df = read_csv(fixture("green_tripdata_sample.csv"), ReadOptions::default()).expect("read fixture");
    assert_eq!(df.column(PASSENGER_COUNT).unwrap().null_count(), 1);

    let filled = fill_missing_passengers(&df, PASSENGER_COUNT).expect("fill");
    assert_eq!(filled.height(), df.height());
    assert_eq!(filled.column(PASSENGER_COUNT).unwrap().null_count(), 0);
    assert_eq!(zeros(&filled), 1);
}

#[test]
fn green_sample_drop_removes_missing_counts() {
    let df = read_csv(fixture("green_tripdata_sample.csv"), ReadOptions::default()).expect("read fixture");
    let cleaned = drop_zero_passengers(&df, PASSENGER_COUNT).expect("filter");
    assert_eq!(cleaned.height(), 3);
    assert_eq!(cleaned.column(PASSENGER_COUNT).unwrap().null_count(), 0);
}

#[test]
fn datetime_columns_parse_after_plain_read() {
    let df = read_csv(fixture("yellow_tripdata_sample.csv"), ReadOptions::default()).expect("read fixture");
    assert_eq!(df.column("tpep_pickup_datetime").unwrap().dtype(), &DataType::String);

    let columns = vec!["tpep_pickup_datetime".to_string(), "tpep_dropoff_datetime".to_string()];
    let parsed = parse_datetime_columns(&df, &columns).expect("parse");
    for name in &columns {
        assert_eq!(
            parsed.column(name).unwrap().dtype(),
            &DataType::Datetime(TimeUnit::Microseconds, None)
        );
        assert_eq!(parsed.column(name).unwrap().null_count(), 0);
    }
}

#[test]
fn missing_column_is_an_error() {
    let df = DataFrame::new(vec![Series::new("trip_distance".into(), vec![1.0f64]).into()]).unwrap();
    assert!(drop_zero_passengers(&df, PASSENGER_COUNT).is_err());
    assert!(fill_missing_passengers(&df, PASSENGER_COUNT).is_err());
}
