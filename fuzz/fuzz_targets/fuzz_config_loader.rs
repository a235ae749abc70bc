#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not.
    if let Ok(cfg) = ppk_config::load_toml(data) {
        if cfg.validate().is_ok() {
            // A validated config must always map onto device options.
            let _ = ppk_core::DeviceOptions::from_config(&cfg, None);
        }
    }
});
