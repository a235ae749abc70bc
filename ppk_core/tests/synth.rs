use ppk_core::synth::{self, spans};
use ppk_core::{Noise, NoiseShape, PpkError, ProfileBuilder, ProfileSpec, Segment};
use rstest::rstest;

fn phase(current_ua: f64, duration_s: f64, noise: Noise) -> Segment {
    Segment::Phase {
        name: "p".into(),
        current_ua,
        duration_s,
        noise,
        logic: None,
    }
}

fn currents(segments: &[Segment], rate: u32, seed: u64) -> Vec<f32> {
    synth::build(segments, rate, seed)
        .unwrap()
        .samples()
        .iter()
        .map(|s| s.current_ua)
        .collect()
}

#[rstest]
fn steady_sleep_second() {
    let b = synth::build(&[phase(3.5, 1.0, Noise::NONE)], 100_000, 0).unwrap();
    assert_eq!(b.sample_count(), 100_000);
    assert!(b.samples().iter().all(|s| s.current_ua == 3.5 && s.logic == 0));
    let stats = b.stats().unwrap();
    assert_eq!(stats.min_ua, 3.5);
    assert_eq!(stats.max_ua, 3.5);
}

#[rstest]
fn same_seed_same_samples() {
    let segs = [
        phase(10.0, 0.05, Noise::gaussian(1.0)),
        phase(500.0, 0.05, Noise::uniform(20.0)),
    ];
    assert_eq!(currents(&segs, 10_000, 42), currents(&segs, 10_000, 42));
}

#[rstest]
fn different_seed_same_shape() {
    let segs = [
        phase(10.0, 0.05, Noise::gaussian(1.0)),
        Segment::Ramp {
            name: "r".into(),
            start_ua: 1.0,
            end_ua: 9.0,
            duration_s: 0.01,
            noise: Noise::NONE,
            logic: None,
        },
    ];
    let a = currents(&segs, 10_000, 1);
    let b = currents(&segs, 10_000, 2);
    assert_eq!(a.len(), b.len());
    assert_ne!(a[..500], b[..500]);
    assert_eq!(a[500..], b[500..], "noise-free segment unaffected by seed");
}

#[rstest]
#[case(0.0, 100.0)]
#[case(-250.0, 3.5)]
#[case(45_000.0, 800.0)]
fn ramp_hits_both_endpoints(#[case] start: f64, #[case] end: f64) {
    let v = currents(
        &[Segment::Ramp {
            name: "r".into(),
            start_ua: start,
            end_ua: end,
            duration_s: 0.0037,
            noise: Noise::NONE,
            logic: None,
        }],
        100_000,
        9,
    );
    assert_eq!(v.len(), 370);
    assert_eq!(v[0], start as f32);
    assert_eq!(v[369], end as f32);
    assert!(v.windows(2).all(|w| if end > start { w[0] <= w[1] } else { w[0] >= w[1] }));
}

#[rstest]
fn gaussian_noise_is_mean_zero_and_unclamped() {
    let v = currents(&[phase(0.0, 1.0, Noise::gaussian(1.0))], 20_000, 5);
    let mean = v.iter().map(|&x| f64::from(x)).sum::<f64>() / v.len() as f64;
    assert!(mean.abs() < 0.05, "mean {mean}");
    assert!(v.iter().any(|&x| x < 0.0), "negative values survive");
    let var = v.iter().map(|&x| f64::from(x).powi(2)).sum::<f64>() / v.len() as f64;
    assert!((var.sqrt() - 1.0).abs() < 0.05, "sigma {}", var.sqrt());
}

#[rstest]
fn zero_duration_segment_is_empty() {
    let b = synth::build(&[phase(1.0, 0.0, Noise::NONE), phase(2.0, 0.001, Noise::NONE)], 1000, 0)
        .unwrap();
    assert_eq!(b.sample_count(), 1);
    assert_eq!(b.samples()[0].current_ua, 2.0);
}

#[rstest]
#[case(phase(f64::NAN, 1.0, Noise::NONE))]
#[case(phase(1.0, -1.0, Noise::NONE))]
#[case(phase(1.0, f64::INFINITY, Noise::NONE))]
#[case(phase(1.0, 1.0, Noise::gaussian(-0.1)))]
#[case(phase(1e300, 0.01, Noise::NONE))]
#[case(phase(1.0, 1e15, Noise::NONE))]
fn invalid_segments_rejected(#[case] seg: Segment) {
    let err = synth::build(&[seg], 1000, 0).unwrap_err();
    assert!(matches!(err, PpkError::InvalidParameter(_)), "{err:?}");
}

#[rstest]
fn oversized_profile_rejected_before_allocating() {
    let err = synth::build(&[phase(1.0, 1e15, Noise::NONE)], 100_000, 1).unwrap_err();
    assert!(matches!(err, PpkError::InvalidParameter(ref m) if m.contains("samples")), "{err:?}");

    // Each half fits on its own; together they do not.
    let half = (synth::MAX_SAMPLES / 2 + 1) as f64 / 1000.0;
    let segs = [phase(1.0, half, Noise::NONE), phase(2.0, half, Noise::NONE)];
    let err = synth::build(&segs, 1000, 0).unwrap_err();
    assert!(matches!(err, PpkError::InvalidParameter(ref m) if m.contains("segment 1")), "{err:?}");

    let s = spans(&[phase(1.0, 1e300, Noise::NONE), phase(1.0, 1e300, Noise::NONE)], 100_000);
    assert_eq!(s[1].samples, usize::MAX..usize::MAX);
}

#[rstest]
fn zero_rate_rejected() {
    assert!(matches!(
        synth::build(&[phase(1.0, 1.0, Noise::NONE)], 0, 0),
        Err(PpkError::InvalidParameter(_))
    ));
}

#[rstest]
fn builder_periodic_wake_and_spans() {
    let builder = ProfileBuilder::new(1000)
        .seed(11)
        .label("beacon")
        .start_time_ms(1_000)
        .periodic_wake(2.0, 0.01, 5000.0, 0.002, 3, Noise::NONE)
        .spike("tx", 20_000.0, 0.005);
    let spans = builder.spans();
    assert_eq!(spans.len(), 7);
    assert_eq!(spans[0].name, "sleep_0");
    assert_eq!(spans[1].samples, 10..12);
    assert_eq!(spans[6].samples, 36..41);
    let b = builder.build().unwrap();
    assert_eq!(b.sample_count(), 41);
    assert_eq!(b.metadata().label.as_deref(), Some("beacon"));
    assert_eq!(b.metadata().start_system_time_ms, 1_000);
    assert_eq!(b.samples()[11].current_ua, 5000.0);
    assert_eq!(b.samples()[38].current_ua, 20_000.0);
}

#[rstest]
fn spans_match_free_function() {
    let segs = vec![phase(1.0, 0.002, Noise::NONE), phase(2.0, 0.003, Noise::NONE)];
    let s = spans(&segs, 1000);
    assert_eq!(s[0].samples, 0..2);
    assert_eq!(s[1].samples, 2..5);
}

#[rstest]
fn profile_spec_from_toml() {
    let spec = ProfileSpec::from_toml(
        r#"
sample_rate_hz = 1000
seed = 7
label = "demo"

[[segments]]
kind = "phase"
name = "sleep"
current_ua = 3
duration_s = 0.01
noise = { amplitude_ua = 0.5, shape = "uniform" }

[[segments]]
kind = "ramp"
start_ua = 3.0
end_ua = 100.0
duration_s = 0.005
logic = 1

[[segments]]
kind = "spike"
peak_ua = 900.0
duration_s = 0.003
"#,
    )
    .unwrap();
    assert_eq!(spec.segments.len(), 3);
    match &spec.segments[0] {
        Segment::Phase { noise, .. } => assert_eq!(noise.shape, NoiseShape::Uniform),
        other => panic!("unexpected {other:?}"),
    }
    let b = spec.build().unwrap();
    assert_eq!(b.sample_count(), 18);
    assert_eq!(b.samples()[10].logic, 1);
    assert_eq!(b.samples()[14].current_ua, 100.0);
    assert_eq!(b, spec.build().unwrap());
}

#[rstest]
fn unknown_segment_kind_is_error() {
    let err = ProfileSpec::from_toml("[[segments]]\nkind = \"sawtooth\"\nduration_s = 1.0\n")
        .unwrap_err();
    assert!(matches!(err, PpkError::InvalidParameter(_)));
}
