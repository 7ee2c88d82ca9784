//! Receive-side frame buffers.
//!
//! A [`VideoFrame`] collects what the ingress stage knows about one wire
//! frame: per-substream byte buffers (for compressed or FEC-protected
//! streams) or just the advertised lengths (for the line-decoded path,
//! where payload bytes go straight into the display framebuffer).

use crate::desc::{ColorSpec, Interlacing};
use crate::fec::FecDesc;

/// Spare bytes appended to substream buffers so codec libraries that read
/// past the end of their input stay within the allocation.
pub const DECOMPRESS_PADDING: usize = 64;

// ── Tile ─────────────────────────────────────────────────────────

/// One substream of a received frame.
#[derive(Debug, Default)]
pub struct Tile {
    pub width: u32,
    pub height: u32,
    /// Accumulated payload bytes. `None` on the line-decoded path, where
    /// the framebuffer is written directly.
    pub data: Option<Vec<u8>>,
    /// Advertised substream byte length (wire header word 2).
    pub data_len: usize,
}

impl Tile {
    /// Copy `payload` to `offset`, allocating the buffer on first use.
    ///
    /// Returns `false` when the write would overrun the advertised length
    /// or an already-allocated buffer (malformed offset, or a header that
    /// grew the length mid-frame); the caller drops the packet.
    pub fn write_at(&mut self, offset: usize, payload: &[u8]) -> bool {
        if self.data.is_none() {
            if offset + payload.len() > self.data_len {
                return false;
            }
            self.data = Some(vec![0u8; self.data_len + DECOMPRESS_PADDING]);
        }
        let buf = self.data.as_mut().expect("just allocated");
        if offset + payload.len() + DECOMPRESS_PADDING > buf.len() {
            return false;
        }
        buf[offset..offset + payload.len()].copy_from_slice(payload);
        true
    }
}

// ── VideoFrame ───────────────────────────────────────────────────

/// A frame as reconstructed from the wire, before FEC and decompression.
#[derive(Debug)]
pub struct VideoFrame {
    pub tiles: Vec<Tile>,
    pub color_spec: Option<ColorSpec>,
    pub interlacing: Option<Interlacing>,
    pub ssrc: u32,
    pub fec: FecDesc,
}

impl VideoFrame {
    /// Allocate an empty frame with `tile_count` unset tiles.
    pub fn new(tile_count: usize) -> Self {
        VideoFrame {
            tiles: (0..tile_count).map(|_| Tile::default()).collect(),
            color_spec: None,
            interlacing: None,
            ssrc: 0,
            fec: FecDesc::NONE,
        }
    }

    /// Sum of the advertised tile lengths.
    pub fn data_len(&self) -> usize {
        self.tiles.iter().map(|t| t.data_len).sum()
    }
}
