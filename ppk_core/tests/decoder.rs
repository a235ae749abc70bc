use std::collections::VecDeque;

use ppk_config::{FrameLayout, RawFrame};
use ppk_core::protocol::{Decoder, DecoderCfg};
use ppk_core::spike::SpikeFilterCfg;
use ppk_core::{CalibrationEntry, PpkError, RangeTable, Sample};
use rstest::rstest;

fn table() -> RangeTable {
    RangeTable::new(
        (0..4)
            .map(|range| CalibrationEntry {
                range,
                gain: 10f64.powi(i32::from(range)),
                offset: 0.5,
            })
            .collect(),
    )
    .unwrap()
}

fn decoder(layout: FrameLayout, settle_drop: u8, spike: bool) -> Decoder {
    Decoder::new(
        DecoderCfg {
            layout,
            range_count: 4,
            settle_drop,
            spike_filter: spike.then(SpikeFilterCfg::default),
            device: "t".into(),
        },
        table(),
    )
}

fn encode(layout: FrameLayout, frames: &[(u16, u8, Option<u8>)]) -> Vec<u8> {
    frames
        .iter()
        .flat_map(|&(adc, range, counter)| {
            layout.encode(RawFrame {
                adc,
                range,
                counter,
                logic: 0,
            })
        })
        .collect()
}

fn run(d: &mut Decoder, bytes: &[u8]) -> Vec<Sample> {
    let mut out = VecDeque::new();
    d.feed(bytes, &mut out).unwrap();
    out.into_iter().collect()
}

#[rstest]
#[case(0, vec![1.5, 10.5, 10.5, 10.5])]
#[case(1, vec![1.5, 10.5, 10.5])]
#[case(2, vec![1.5, 10.5])]
fn settle_drop_is_configurable(#[case] drop: u8, #[case] want: Vec<f32>) {
    let layout = FrameLayout::ppk2();
    let mut d = decoder(layout, drop, false);
    let bytes = encode(
        layout,
        &[(1, 0, Some(0)), (1, 1, Some(1)), (1, 1, Some(2)), (1, 1, Some(3))],
    );
    let got: Vec<f32> = run(&mut d, &bytes).iter().map(|s| s.current_ua).collect();
    assert_eq!(got, want);
    assert_eq!(d.stats().settling_dropped, u64::from(drop));
    assert_eq!(d.stats().lost_samples, 0);
}

#[rstest]
fn compact_layout_without_counter() {
    let layout = FrameLayout::compact();
    let mut d = decoder(layout, 1, false);
    let bytes: Vec<u8> = [(7u16, 2u8), (7, 2), (7, 3), (7, 3)]
        .iter()
        .flat_map(|&(adc, range)| {
            layout.encode(RawFrame {
                adc,
                range,
                counter: None,
                logic: 0xA5,
            })
        })
        .collect();
    assert_eq!(bytes.len(), 12);
    let got = run(&mut d, &bytes);
    assert_eq!(
        got.iter().map(|s| s.current_ua).collect::<Vec<_>>(),
        vec![700.5, 700.5, 7000.5]
    );
    assert!(got.iter().all(|s| s.logic == 0xA5));
}

#[rstest]
fn counter_gap_counts_lost_samples() {
    let layout = FrameLayout::ppk2();
    let mut d = decoder(layout, 1, false);
    // 3..9 never arrived; the wrap from 63 to 0 is not a gap.
    let bytes = encode(
        layout,
        &[(1, 0, Some(1)), (1, 0, Some(2)), (1, 0, Some(10)), (1, 0, Some(63)), (1, 0, Some(0))],
    );
    let got = run(&mut d, &bytes);
    assert_eq!(got.len(), 5);
    assert_eq!(d.stats().lost_samples, 7 + 52);
}

#[rstest]
fn rejected_frames_are_not_lost_samples() {
    let layout = FrameLayout::ppk2();
    let mut d = decoder(layout, 1, false);
    let bytes = encode(layout, &[(1, 0, Some(0)), (1, 7, Some(1)), (1, 0, Some(2))]);
    let got = run(&mut d, &bytes);
    assert_eq!(got.len(), 2);
    assert_eq!(d.stats().dropped_frames, 1);
    assert_eq!(d.stats().lost_samples, 0);
    assert!(matches!(d.last_fault(), Some(PpkError::Decode { offset: 4, .. })));
}

#[rstest]
fn spike_filter_smooths_after_switch() {
    let layout = FrameLayout::ppk2();
    let frames: Vec<(u16, u8, Option<u8>)> = (0..20u8)
        .map(|i| (100, 0, Some(i)))
        .chain((20..30u8).map(|i| (100, 1, Some(i))))
        .collect();
    let bytes = encode(layout, &frames);
    let raw = run(&mut decoder(layout, 1, false), &bytes);
    let smooth = run(&mut decoder(layout, 1, true), &bytes);
    assert_eq!(raw.len(), smooth.len());
    assert_eq!(raw[..20], smooth[..20]);
    // First sample after the switch is pulled toward the previous level.
    assert!(smooth[20].current_ua < raw[20].current_ua);
    assert_eq!(smooth.last(), raw.last());
}

#[rstest]
fn partial_frame_carried_over() {
    let layout = FrameLayout::ppk2();
    let mut d = decoder(layout, 1, false);
    let bytes = encode(layout, &[(5, 0, Some(0)), (6, 0, Some(1))]);
    assert_eq!(run(&mut d, &bytes[..5]).len(), 1);
    assert_eq!(d.partial_len(), 1);
    let rest = run(&mut d, &bytes[5..]);
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].current_ua, 6.5);
    assert_eq!(d.partial_len(), 0);
}
