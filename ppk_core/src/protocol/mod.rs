//! Wire protocol of PPK2-class instruments: commands, identification text,
//! and the measurement frame decoder.
pub mod command;
pub mod decoder;
pub mod metadata;

pub use command::{Command, DeviceMode};
pub use decoder::{
    DecodeCtx, DecodeStats, Decoder, DecoderCfg, FrameOutcome, RangeState, decode_frame,
};
pub use metadata::DeviceMetadata;
