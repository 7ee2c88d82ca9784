//! External decompressor contract.
//!
//! Concrete codecs (H.264, JPEG, VP8, DXT transcoders, …) are external
//! collaborators; the pipeline drives them through this trait, one instance
//! per substream.

use crate::desc::{ColorSpec, VideoDesc};
use crate::display::RgbShift;
use crate::error::DecodeError;

/// Result of one [`Decompressor::decompress`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompressStatus {
    /// The destination buffer now holds a presentable picture.
    GotFrame,
    /// The codec consumed the input but needs more data (interframe codecs
    /// waiting for a keyframe, reordering delay, …).
    NoFrame,
    /// The codec cannot decode this stream at all; the caller should pick a
    /// different output codec.
    CantDecode,
}

/// A stateful decompressor for one substream.
pub trait Decompressor: Send {
    /// Prepare for a new stream format. Returns the size in bytes of the
    /// destination buffer one decompressed tile needs (rows are `pitch`
    /// bytes apart).
    fn reconfigure(
        &mut self,
        desc: &VideoDesc,
        shift: RgbShift,
        pitch: usize,
        out_codec: ColorSpec,
    ) -> Result<usize, DecodeError>;

    /// Decode one tile. `frame_seq` is the wire buffer number, usable for
    /// loss detection by interframe codecs.
    fn decompress(&mut self, dst: &mut [u8], src: &[u8], frame_seq: u32) -> DecompressStatus;

    /// Whether incomplete input (lost packets) may still be fed to
    /// [`decompress`](Self::decompress).
    fn accepts_corrupted_frames(&self) -> bool {
        false
    }
}

/// Factory advertising which codec pairs its decompressors handle.
pub trait DecompressorFactory: Send + Sync {
    fn supports(&self, from: ColorSpec, to: ColorSpec) -> bool;

    fn create(&self) -> Box<dyn Decompressor>;
}
