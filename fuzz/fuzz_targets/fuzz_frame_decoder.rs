#![no_main]
use std::collections::VecDeque;

use libfuzzer_sys::fuzz_target;
use ppk_config::FrameLayout;
use ppk_core::calibration::Modifiers;
use ppk_core::protocol::{Decoder, DecoderCfg};
use ppk_core::spike::SpikeFilterCfg;
use ppk_core::RangeTable;

fuzz_target!(|input: (bool, bool, u8, Vec<u8>)| {
    let (compact, spike, split, bytes) = input;
    let layout = if compact {
        FrameLayout::compact()
    } else {
        FrameLayout::ppk2()
    };
    let Ok(table) = RangeTable::from_modifiers(&Modifiers::ppk2_defaults(5), 3700, 5) else {
        return;
    };
    let mut decoder = Decoder::new(
        DecoderCfg {
            layout,
            range_count: 5,
            settle_drop: 1,
            spike_filter: spike.then(SpikeFilterCfg::default),
            device: "fuzz".into(),
        },
        table,
    );
    let mut out = VecDeque::new();
    for chunk in bytes.chunks(usize::from(split.max(1))) {
        let _ = decoder.feed(chunk, &mut out);
    }
    assert!(out.iter().all(|s| s.current_ua.is_finite()));
    assert!(decoder.partial_len() < layout.frame_size());
});
