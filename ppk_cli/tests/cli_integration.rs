use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

const PROFILE: &str = r#"
sample_rate_hz = 1000
seed = 3
label = "demo"

[[segments]]
kind = "phase"
name = "sleep"
current_ua = 3.5
duration_s = 1.0
"#;

fn write_profile(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("profile.toml");
    fs::write(&path, PROFILE).unwrap();
    path
}

fn synth(dir: &tempfile::TempDir) -> PathBuf {
    let profile = write_profile(dir);
    let out = dir.path().join("rec.ppk2");
    Command::cargo_bin("ppk")
        .unwrap()
        .arg("synth")
        .arg("--profile")
        .arg(&profile)
        .arg("-o")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote 1000 samples"));
    out
}

fn json_stdout(cmd: &mut Command) -> serde_json::Value {
    let out = cmd.assert().success().get_output().stdout.clone();
    let text = String::from_utf8_lossy(&out);
    let line = text.lines().last().unwrap_or("");
    serde_json::from_str(line).unwrap_or_else(|e| panic!("bad JSON ({e}): {text}"))
}

fn info_json(path: &Path) -> serde_json::Value {
    json_stdout(
        Command::cargo_bin("ppk")
            .unwrap()
            .args(["--json", "--log-level", "error", "info"])
            .arg(path),
    )
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["self-check"], 0, "self-check ok", "stdout")]
#[case(&["measure", "--sim"], 2, "required", "stderr")]
#[case(&["annotate", "x.ppk2", "--log", "x.log"], 2, "--channel", "stderr")]
#[case(&["annotate", "x.ppk2", "--log", "x.log", "--channel", "GPS"], 2, "NAME=N", "stderr")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let assert = Command::cargo_bin("ppk").unwrap().args(args).assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[rstest]
fn synth_then_info_reports_stats() {
    let dir = tempdir().unwrap();
    let rec = synth(&dir);
    let v = info_json(&rec);
    assert_eq!(v["samples"], 1000);
    assert_eq!(v["sample_rate_hz"], 1000);
    assert_eq!(v["label"], "demo");
    assert_eq!(v["format_version"], 2);
    assert_eq!(v["min_ua"], 3.5);
    assert_eq!(v["max_ua"], 3.5);
    assert_eq!(v["minimap"]["origin"], "stored");

    Command::cargo_bin("ppk")
        .unwrap()
        .arg("info")
        .arg(&rec)
        .assert()
        .success()
        .stdout(predicate::str::contains("samples:      1000"));
}

#[rstest]
fn synth_seed_override_is_reproducible() {
    let dir = tempdir().unwrap();
    let profile = dir.path().join("noisy.toml");
    fs::write(
        &profile,
        "sample_rate_hz = 1000\n[[segments]]\nkind = \"phase\"\ncurrent_ua = 50.0\nduration_s = 0.1\nnoise = { amplitude_ua = 2.0 }\n",
    )
    .unwrap();
    let run = |name: &str, seed: &str| {
        let out = dir.path().join(name);
        Command::cargo_bin("ppk")
            .unwrap()
            .arg("synth")
            .arg("--profile")
            .arg(&profile)
            .args(["--seed", seed, "-o"])
            .arg(&out)
            .assert()
            .success();
        fs::read(out).unwrap()
    };
    assert_eq!(run("a.ppk2", "9"), run("b.ppk2", "9"));
    assert_ne!(run("c.ppk2", "9"), run("d.ppk2", "10"));
}

#[rstest]
fn info_on_garbage_is_corrupt_file() {
    let dir = tempdir().unwrap();
    let bad = dir.path().join("bad.ppk2");
    fs::write(&bad, b"definitely not a zip archive").unwrap();
    Command::cargo_bin("ppk")
        .unwrap()
        .arg("info")
        .arg(&bad)
        .assert()
        .code(7)
        .stderr(predicate::str::contains("is not a readable recording"));
}

#[rstest]
fn info_on_truncated_archive_reports_json_error() {
    let dir = tempdir().unwrap();
    let rec = synth(&dir);
    let bytes = fs::read(&rec).unwrap();
    fs::write(&rec, &bytes[..bytes.len() / 2]).unwrap();
    let out = Command::cargo_bin("ppk")
        .unwrap()
        .args(["--json", "--log-level", "error", "info"])
        .arg(&rec)
        .assert()
        .code(7)
        .get_output()
        .stdout
        .clone();
    let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(v["reason"], "CorruptFile");
    assert_eq!(v["exit_code"], 7);
}

#[rstest]
fn measure_sim_records_and_saves() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("live.ppk2");
    let v = json_stdout(
        Command::cargo_bin("ppk")
            .unwrap()
            .args(["--json", "--log-level", "error", "measure", "--sim"])
            .args(["--duration", "0.05", "--label", "bench run", "-o"])
            .arg(&out),
    );
    assert!(v["samples"].as_u64().unwrap() > 0, "{v}");
    assert_eq!(v["decode"]["dropped_frames"], 0);
    let info = info_json(&out);
    assert_eq!(info["samples"], v["samples"]);
    assert_eq!(info["label"], "bench run");
    assert_eq!(info["sample_rate_hz"], 100_000);
}

#[rstest]
#[case("unplug")]
#[case("stall")]
fn measure_sim_link_loss_exits_six_and_keeps_file(#[case] fault: &str) {
    let dir = tempdir().unwrap();
    let out = dir.path().join("lost.ppk2");
    Command::cargo_bin("ppk")
        .unwrap()
        .env("PPK_TEST_SIM_FAULT", fault)
        .args(["measure", "--sim", "--duration", "1", "-o"])
        .arg(&out)
        .assert()
        .code(6)
        .stderr(predicate::str::contains("went away during the run"));
    assert!(out.exists());
    assert_eq!(info_json(&out)["samples"], 0);
}

#[cfg(not(feature = "hardware"))]
#[rstest]
fn measure_without_serial_support_asks_for_sim() {
    let dir = tempdir().unwrap();
    Command::cargo_bin("ppk")
        .unwrap()
        .args(["measure", "--duration", "1", "-o"])
        .arg(dir.path().join("x.ppk2"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--sim"));
}

#[rstest]
fn annotate_drives_channel_and_writes_legend() {
    let dir = tempdir().unwrap();
    let rec = synth(&dir);
    let log = dir.path().join("dut.log");
    fs::write(
        &log,
        "boot\nT=0.250 GPS_STARTED\nT=0.400 LTE_STARTED\nT=0.500 GPS_STOPPED\n",
    )
    .unwrap();
    let out = dir.path().join("annotated.ppk2");
    let legend = dir.path().join("legend.json");
    let v = json_stdout(
        Command::cargo_bin("ppk")
            .unwrap()
            .args(["--json", "--log-level", "error", "annotate"])
            .arg(&rec)
            .arg("--log")
            .arg(&log)
            .args(["--channel", "GPS=2", "-o"])
            .arg(&out)
            .arg("--legend")
            .arg(&legend),
    );
    // LTE is not mapped, so only the two GPS edges count.
    assert_eq!(v["events"], 2);

    let buffer = ppk_core::codec::load(&out).unwrap();
    let s = buffer.samples();
    assert!(!s[249].channel(2));
    assert!(s[250].channel(2));
    assert!(s[499].channel(2));
    assert!(!s[500].channel(2));
    assert!(s.iter().all(|x| x.logic & !0b100 == 0));

    let legend_text = fs::read_to_string(&legend).unwrap();
    assert!(legend_text.contains("GPS"));
    assert!(legend_text.contains("D2"));
    // Source recording untouched.
    assert!(ppk_core::codec::load(&rec).unwrap().samples().iter().all(|x| x.logic == 0));
}

#[rstest]
fn cli_reports_bad_calibration_header() {
    let dir = tempdir().unwrap();
    let bad_csv = dir.path().join("calib.csv");
    fs::write(&bad_csv, "range,value\n0,1.0\n").unwrap();
    Command::cargo_bin("ppk")
        .unwrap()
        .arg("--calibration")
        .arg(&bad_csv)
        .arg("self-check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid headers"));
}

#[rstest]
#[case("[source]\nvoltage_mv = 9000\n", "source.voltage_mv")]
#[case("[stream]\nread_timeout_ms = 0\n", "stream.read_timeout_ms")]
#[case("[logging]\nrotation = \"weekly\"\n", "logging.rotation")]
fn cli_rejects_invalid_config(#[case] toml: &str, #[case] key: &str) {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("cfg.toml");
    fs::write(&cfg, toml).unwrap();
    Command::cargo_bin("ppk")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .arg("self-check")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Configuration is invalid").and(predicate::str::contains(key)));
}

#[rstest]
fn self_check_json_with_calibration_csv() {
    let dir = tempdir().unwrap();
    let csv = dir.path().join("calib.csv");
    fs::write(&csv, "range,gain,offset\n0,0.01,0\n1,0.1,0\n2,1.0,0\n3,10.0,0\n4,100.0,0\n").unwrap();
    let v = json_stdout(
        Command::cargo_bin("ppk")
            .unwrap()
            .args(["--json", "--log-level", "error", "--calibration"])
            .arg(&csv)
            .arg("self-check"),
    );
    assert_eq!(v["ok"], true);
    assert_eq!(v["profile"], "ppk2");
}
