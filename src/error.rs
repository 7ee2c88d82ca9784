//! Domain-specific error types for the receive pipeline.
//!
//! Every recoverable failure has a typed variant; callers decide the scope
//! (drop a packet, drop a frame, stop the stream) from the variant, not
//! from string matching.

use thiserror::Error;

use crate::desc::{ColorSpec, VideoDesc};

/// The canonical error type of the decoder.
#[derive(Debug, Error)]
pub enum DecodeError {
    // ── Packet errors ────────────────────────────────────────────
    #[error("unknown payload type {0}")]
    UnknownPayloadType(u8),

    #[error("unknown codec FourCC {}", crate::desc::fourcc_name(.0))]
    UnknownFourcc([u8; 4]),

    #[error("unknown interlacing tag {0}")]
    UnknownInterlacing(u8),

    #[error("packet truncated: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    #[error("receiving encrypted video data but no decryption key entered")]
    MissingDecryptionKey,

    #[error("receiving unencrypted video data while expecting encrypted")]
    UnexpectedPlaintext,

    /// The crypto header carries cipher mode 0 or an out-of-range value.
    #[error("unknown cipher mode {0}")]
    UnknownCipherMode(u8),

    // ── Stream errors ────────────────────────────────────────────
    /// A substream index implied a geometry no video mode covers.
    #[error("cannot infer video mode for {0} substreams")]
    UnsupportedSubstreamCount(u32),

    /// Codec selection found neither a line transform nor a decompressor.
    #[error("no decoder available for incoming codec {0}")]
    NoDecoder(ColorSpec),

    #[error("unable to reconfigure display to {0}")]
    DisplayReconfigureFailed(VideoDesc),

    #[error("unable to initialize {kind} error correction (k={k} m={m})")]
    FecInitFailed {
        kind: &'static str,
        k: u32,
        m: u32,
    },

    /// A previous fatal error put the decoder out of service.
    #[error("decoder is stopped after a fatal error")]
    Poisoned,
}
