use std::fs::File;
use std::io::Write;

use ppk_config::{CalibrationRow, CalibrationTable, load_calibration_csv};
use rstest::rstest;
use tempfile::tempdir;

fn row(range: u8, gain: f64, offset: f64) -> CalibrationRow {
    CalibrationRow {
        range,
        gain,
        offset,
    }
}

#[rstest]
fn table_keeps_rows_in_order() {
    let t = CalibrationTable::from_rows(vec![row(0, 0.01, 0.0), row(2, 1.0, -0.5)]).unwrap();
    assert_eq!(t.entries.len(), 2);
    assert_eq!(t.max_range(), Some(2));
}

#[rstest]
fn rejects_duplicate_range() {
    let err = CalibrationTable::from_rows(vec![row(1, 0.1, 0.0), row(1, 0.2, 0.0)])
        .expect_err("duplicate range");
    assert!(format!("{err}").contains("duplicate range 1"));
}

#[rstest]
fn rejects_descending_ranges() {
    let err = CalibrationTable::from_rows(vec![row(2, 0.1, 0.0), row(1, 0.2, 0.0)])
        .expect_err("descending");
    assert!(format!("{err}").contains("strictly increasing"));
}

#[rstest]
#[case(0.0, 0.0)]
#[case(f64::NAN, 0.0)]
#[case(f64::INFINITY, 0.0)]
#[case(1.0, f64::NAN)]
fn rejects_degenerate_coefficients(#[case] gain: f64, #[case] offset: f64) {
    assert!(CalibrationTable::from_rows(vec![row(0, gain, offset)]).is_err());
}

#[rstest]
fn rejects_empty() {
    assert!(CalibrationTable::from_rows(Vec::new()).is_err());
}

#[rstest]
fn loads_csv_with_exact_headers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cal.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "range,gain,offset").unwrap();
    writeln!(f, "0,0.0106,-0.02").unwrap();
    writeln!(f, "1, 0.1077 ,0.0").unwrap();
    drop(f);

    let t = load_calibration_csv(&path).unwrap();
    assert_eq!(t.entries.len(), 2);
    assert!((t.entries[1].gain - 0.1077).abs() < 1e-12);
    assert!((t.entries[0].offset + 0.02).abs() < 1e-12);
}

#[rstest]
fn rejects_wrong_headers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cal.csv");
    std::fs::write(&path, "raw,grams\n1,2\n").unwrap();
    let err = load_calibration_csv(&path).expect_err("wrong headers");
    assert!(format!("{err}").contains("range,gain,offset"));
}

#[rstest]
fn reports_bad_row_number() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cal.csv");
    std::fs::write(&path, "range,gain,offset\n0,0.01,0\n1,abc,0\n").unwrap();
    let err = load_calibration_csv(&path).expect_err("non-numeric gain");
    assert!(format!("{err}").contains("row 3"));
}

#[rstest]
fn missing_file_is_reported() {
    let dir = tempdir().unwrap();
    let err = load_calibration_csv(&dir.path().join("nope.csv")).expect_err("missing");
    assert!(format!("{err}").contains("open calibration CSV"));
}
