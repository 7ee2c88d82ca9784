//! Display sink contract and framebuffer types.
//!
//! The display owns its framebuffers: the pipeline acquires a writable
//! frame with [`Display::get_frame`], fills it, and hands it back through
//! [`Display::put_frame`]. All operations are synchronous.

use crate::desc::{ColorSpec, Interlacing, VideoDesc, VideoMode};

// ── Properties ───────────────────────────────────────────────────

/// How the display wants multi-substream video delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferLayout {
    /// One large framebuffer hosting all tiles side by side.
    Merged,
    /// One independent buffer per tile.
    SeparateTiles,
}

/// Red/green/blue bit positions requested by the display for RGB-family
/// output codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RgbShift {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Default for RgbShift {
    fn default() -> Self {
        RgbShift { r: 0, g: 8, b: 16 }
    }
}

// ── put_frame policy ─────────────────────────────────────────────

/// Delivery policy for [`Display::put_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutPolicy {
    /// Drop the frame if the display cannot take it right now.
    Nonblock,
    /// Wait until the display accepts the frame.
    Blocking,
    /// The frame content is void; reclaim the buffer without showing it.
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutResult {
    Displayed,
    Dropped,
}

// ── DisplayFrame ─────────────────────────────────────────────────

/// One tile of a display-owned framebuffer.
#[derive(Debug, Clone)]
pub struct FrameTile {
    pub width: u32,
    pub height: u32,
    /// Pixel storage; rows are `pitch` bytes apart.
    pub data: Vec<u8>,
    /// Valid bytes in `data`.
    pub data_len: usize,
}

/// A writable framebuffer acquired from the display.
#[derive(Debug, Clone)]
pub struct DisplayFrame {
    pub tiles: Vec<FrameTile>,
    pub color_spec: ColorSpec,
    pub interlacing: Interlacing,
    pub ssrc: u32,
    /// When set, the present stage propagates decompressor-reported tile
    /// lengths into `data_len` before submission.
    pub decoder_overrides_data_len: bool,
}

// ── Display ──────────────────────────────────────────────────────

/// The display sink driven by the decode pipeline.
///
/// Property queries have defaults matching the common case: a merged
/// framebuffer, `{0, 8, 16}` RGB shifts, derived pitch, and progressive /
/// merged-interlaced / segmented-frame support.
pub trait Display: Send + Sync {
    /// Output codecs the display accepts natively, in preference order.
    fn codecs(&self) -> Vec<ColorSpec>;

    /// Interlacing formats the display can present without conversion.
    fn supported_il_modes(&self) -> Vec<Interlacing> {
        vec![
            Interlacing::Progressive,
            Interlacing::InterlacedMerged,
            Interlacing::SegmentedFrame,
        ]
    }

    fn layout(&self) -> FramebufferLayout {
        FramebufferLayout::Merged
    }

    fn rgb_shift(&self) -> RgbShift {
        RgbShift::default()
    }

    /// Fixed framebuffer pitch in bytes, or `None` to derive it from the
    /// output codec's linesize.
    fn pitch(&self) -> Option<usize> {
        None
    }

    /// Switch the display to a new output format. Returns `false` when the
    /// display cannot present it.
    fn reconfigure(&self, desc: &VideoDesc, mode: VideoMode) -> bool;

    /// Acquire the next writable framebuffer. Only called after a
    /// successful [`reconfigure`](Self::reconfigure); may block until a
    /// buffer is free.
    fn get_frame(&self) -> DisplayFrame;

    /// Submit a filled framebuffer.
    fn put_frame(&self, frame: DisplayFrame, policy: PutPolicy) -> PutResult;
}
