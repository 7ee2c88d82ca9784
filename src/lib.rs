//! # vidrx — receive-side video decoding pipeline
//!
//! Ingests reassembled payload packets of a custom video RTP profile,
//! reconstructs frames (after forward error correction and decryption
//! where the stream uses them), converts pixel data into the display's
//! format and hands completed frames to the display sink under strict
//! latency and backpressure constraints.
//!
//! ## Architecture
//!
//! ```text
//! receive thread                 FEC worker              decompress worker
//! ┌─────────────────┐           ┌──────────────┐        ┌────────────────┐
//! │ decode_frame()  │           │ block        │        │ decompressors  │
//! │  parse headers  │ FrameMsg  │ reconstruct  │FrameMsg│ (per tile)     │
//! │  decrypt        ├──────────►│ inner header ├───────►│ interlacing    │
//! │  line decode ───┼─► display │ line decode ─┼─► fb   │ put_frame ──►  │
//! │  or accumulate  │    fb     │              │        │ get_frame      │
//! └─────────────────┘           └──────────────┘        └────────────────┘
//! ```
//!
//! Uncompressed streams are decoded per line straight into the display
//! framebuffer on the receive thread; compressed and FEC-protected streams
//! accumulate into receive buffers and flow through the workers. The two
//! frame queues hold one message each — queue pressure is the only
//! backpressure between stages.

pub mod codecs;
pub mod control;
pub mod decoder;
pub mod decompress;
pub mod decrypt;
pub mod desc;
pub mod display;
pub mod error;
pub mod fec;
pub mod frame;
pub mod header;
pub mod stats;
pub mod transform;

mod msg;
mod pipeline;
mod util;

// ── Re-exports ───────────────────────────────────────────────────

pub use codecs::Codecs;
pub use control::{ControlSink, NullControl};
pub use decoder::{
    BurstCounters, CodedPacket, DecoderOptions, DropPolicy, IngressFeedback, VideoDecoder,
    VideoDecoderBuilder,
};
pub use decompress::{DecompressStatus, Decompressor, DecompressorFactory};
pub use decrypt::{CipherMode, Decryptor};
pub use desc::{ColorSpec, Interlacing, VideoDesc, VideoMode};
pub use display::{
    Display, DisplayFrame, FrameTile, FramebufferLayout, PutPolicy, PutResult, RgbShift,
};
pub use error::DecodeError;
pub use fec::{FecDesc, FecEngine, FecFactory, FecKind};
pub use header::{FecHeader, PayloadType, VideoHeader};
pub use stats::StatsSnapshot;
