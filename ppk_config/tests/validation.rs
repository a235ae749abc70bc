use ppk_config::{AckPolicy, MeterMode, load_toml};
use rstest::rstest;

#[test]
fn empty_config_uses_builtin_defaults() {
    let cfg = load_toml("").expect("parse TOML");
    cfg.validate().expect("defaults are valid");
    assert_eq!(cfg.device.usb_vid, 0x1915);
    assert_eq!(cfg.device.usb_pid, 0xC00A);
    assert_eq!(cfg.stream.settle_drop, 1);
    assert_eq!(cfg.source.mode, MeterMode::Source);
    assert_eq!(cfg.profile().name, "ppk2");
}

#[test]
fn full_config_parses() {
    let toml = r#"
[device]
port = "/dev/ttyACM0"
baud = 115200

[stream]
read_timeout_ms = 50
max_retries = 5
backoff_ms = 20
settle_drop = 2
spike_filter = true

[source]
mode = "ampere"
voltage_mv = 1800
power_on = false

[logging]
file = "ppk.log"
level = "debug"
rotation = "daily"

[[calibration.entries]]
range = 0
gain = 0.01
offset = 0.0

[[calibration.entries]]
range = 1
gain = 0.1
offset = -0.5
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    cfg.validate().expect("valid");
    assert_eq!(cfg.device.port.as_deref(), Some("/dev/ttyACM0"));
    assert_eq!(cfg.stream.max_retries, 5);
    assert!(cfg.stream.spike_filter);
    assert_eq!(cfg.source.mode, MeterMode::Ampere);
    assert_eq!(cfg.calibration.as_ref().map(|c| c.entries.len()), Some(2));
}

#[test]
fn profile_override_merges_with_builtin() {
    let toml = r#"
[profile]
name = "ppk2-silent"
mode_ack = "none"
range_count = 4

[profile.frame]
size = 3
range_bits = 2
counter_bits = 0
logic_shift = 16
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    cfg.validate().expect("valid");
    let p = cfg.profile();
    assert_eq!(p.name, "ppk2-silent");
    assert_eq!(p.mode_ack, AckPolicy::None);
    assert_eq!(p.frame.size, 3);
    assert_eq!(p.range_count, 4);
    assert_eq!(p.vdd_max_mv, 5000);
    assert_eq!(p.commands.get_metadata, 0x19);
}

#[test]
fn range_count_must_fit_range_field() {
    let toml = r#"
[profile]
range_count = 5

[profile.frame]
range_bits = 2
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("5 ranges do not fit 2 bits");
    assert!(format!("{err}").contains("does not fit"));
}

#[rstest]
#[case("[stream]\nread_timeout_ms = 0", "stream.read_timeout_ms must be >= 1")]
#[case("[stream]\nidentify_timeout_ms = 0", "stream.identify_timeout_ms must be >= 1")]
#[case("[stream]\nack_timeout_ms = 0", "stream.ack_timeout_ms must be >= 1")]
#[case("[stream]\nread_chunk = 2", "stream.read_chunk must be >= one frame")]
#[case("[source]\nvoltage_mv = 700", "source.voltage_mv must be in [800, 5000]")]
#[case("[source]\nvoltage_mv = 5001", "source.voltage_mv must be in [800, 5000]")]
#[case("[device]\nbaud = 0", "device.baud must be > 0")]
#[case("[device]\nport = \"  \"", "device.port must not be empty")]
#[case("[logging]\nrotation = \"weekly\"", "logging.rotation must be one of")]
fn rejects_invalid_values(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should be rejected");
    assert!(
        format!("{err}").contains(needle),
        "expected '{needle}' in '{err}'"
    );
}

#[test]
fn calibration_range_beyond_profile_rejected() {
    let toml = r#"
[[calibration.entries]]
range = 5
gain = 1.0
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("range 5 is reserved on ppk2");
    assert!(format!("{err}").contains("reserved"));
}

#[test]
fn unknown_mode_is_a_parse_error() {
    let toml = "[source]\nmode = \"ohm\"";
    assert!(load_toml(toml).is_err());
}
