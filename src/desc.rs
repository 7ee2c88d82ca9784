//! Shared descriptor types for the receive pipeline.
//!
//! These describe *what* is on the wire: pixel layout, frame geometry,
//! interlacing and substream arrangement. They are distinct from the
//! per-frame buffers in [`crate::frame`] that carry the actual bytes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

// ── ColorSpec ────────────────────────────────────────────────────

/// Pixel layout or compression of a video stream.
///
/// Uncompressed entries have a meaningful [`bpp`](Self::bpp) and
/// [`linesize`](Self::linesize); bitstream codecs (H.264, JPEG, VP8) are
/// opaque and only ever handled by an external decompressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorSpec {
    Rgba,
    Rgb,
    Uyvy,
    Yuyv,
    /// 10-bit 4:2:2 YCbCr packed in 128-byte blocks of 48 pixels.
    V210,
    /// 10-bit RGB in a 32-bit word.
    R10k,
    Dxt1,
    Dxt1Yuv,
    Dxt5,
    H264,
    Jpeg,
    Vp8,
}

impl ColorSpec {
    const ALL: [ColorSpec; 12] = [
        ColorSpec::Rgba, ColorSpec::Rgb, ColorSpec::Uyvy, ColorSpec::Yuyv,
        ColorSpec::V210, ColorSpec::R10k, ColorSpec::Dxt1, ColorSpec::Dxt1Yuv,
        ColorSpec::Dxt5, ColorSpec::H264, ColorSpec::Jpeg, ColorSpec::Vp8,
    ];

    const fn info(self) -> ([u8; 4], &'static str) {
        match self {
            ColorSpec::Rgba => (*b"RGBA", "RGBA"),
            ColorSpec::Rgb => (*b"RGB2", "RGB"),
            ColorSpec::Uyvy => (*b"UYVY", "UYVY"),
            ColorSpec::Yuyv => (*b"YUY2", "YUYV"),
            ColorSpec::V210 => (*b"v210", "v210"),
            ColorSpec::R10k => (*b"R10k", "R10k"),
            ColorSpec::Dxt1 => (*b"DXT1", "DXT1"),
            ColorSpec::Dxt1Yuv => (*b"DX1Y", "DXT1-YUV"),
            ColorSpec::Dxt5 => (*b"DXT5", "DXT5"),
            ColorSpec::H264 => (*b"H264", "H.264"),
            ColorSpec::Jpeg => (*b"JPEG", "JPEG"),
            ColorSpec::Vp8 => (*b"VP80", "VP8"),
        }
    }

    /// Wire FourCC of this codec.
    pub const fn fourcc(self) -> [u8; 4] {
        self.info().0
    }

    pub const fn name(self) -> &'static str {
        self.info().1
    }

    /// Resolve a wire FourCC, or fail with [`DecodeError::UnknownFourcc`].
    pub fn from_fourcc(fcc: [u8; 4]) -> Result<Self, DecodeError> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.fourcc() == fcc)
            .ok_or(DecodeError::UnknownFourcc(fcc))
    }

    /// Average bytes per pixel. Fractional for sub-byte formats; 1.0 for
    /// opaque bitstreams, whose buffers are never sized from it.
    pub fn bpp(self) -> f64 {
        match self {
            ColorSpec::Rgba | ColorSpec::R10k => 4.0,
            ColorSpec::Rgb => 3.0,
            ColorSpec::Uyvy | ColorSpec::Yuyv => 2.0,
            ColorSpec::V210 => 8.0 / 3.0,
            ColorSpec::Dxt1 | ColorSpec::Dxt1Yuv => 0.5,
            ColorSpec::Dxt5 | ColorSpec::H264 | ColorSpec::Jpeg | ColorSpec::Vp8 => 1.0,
        }
    }

    /// Bytes per image row of `width` pixels, including codec alignment.
    pub fn linesize(self, width: usize) -> usize {
        match self {
            // v210 packs 48 pixels into 128-byte blocks.
            ColorSpec::V210 => (width + 47) / 48 * 128,
            _ => (width as f64 * self.bpp()).ceil() as usize,
        }
    }

    /// Whether this is one of the S3TC block formats.
    pub const fn is_dxt(self) -> bool {
        matches!(self, ColorSpec::Dxt1 | ColorSpec::Dxt1Yuv | ColorSpec::Dxt5)
    }
}

impl fmt::Display for ColorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Printable rendering of a FourCC for diagnostics.
pub(crate) fn fourcc_name(fcc: &[u8; 4]) -> String {
    fcc.iter()
        .map(|&b| {
            if b.is_ascii_graphic() {
                (b as char).to_string()
            } else {
                format!("\\x{b:02x}")
            }
        })
        .collect()
}

// ── Interlacing ──────────────────────────────────────────────────

/// Interlacing of a stream, as carried in the 3-bit header tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interlacing {
    Progressive,
    UpperFieldFirst,
    LowerFieldFirst,
    InterlacedMerged,
    SegmentedFrame,
}

impl Interlacing {
    /// Wire tag (header word 5, bits 31..29).
    pub const fn tag(self) -> u8 {
        match self {
            Interlacing::Progressive => 0,
            Interlacing::UpperFieldFirst => 1,
            Interlacing::LowerFieldFirst => 2,
            Interlacing::InterlacedMerged => 3,
            Interlacing::SegmentedFrame => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, DecodeError> {
        match tag {
            0 => Ok(Interlacing::Progressive),
            1 => Ok(Interlacing::UpperFieldFirst),
            2 => Ok(Interlacing::LowerFieldFirst),
            3 => Ok(Interlacing::InterlacedMerged),
            4 => Ok(Interlacing::SegmentedFrame),
            other => Err(DecodeError::UnknownInterlacing(other)),
        }
    }

    /// Suffix used when formatting a descriptor (`p`, `i`, `psf`, …).
    pub const fn suffix(self) -> &'static str {
        match self {
            Interlacing::Progressive => "p",
            Interlacing::UpperFieldFirst => "uff",
            Interlacing::LowerFieldFirst => "lff",
            Interlacing::InterlacedMerged => "i",
            Interlacing::SegmentedFrame => "psf",
        }
    }

    /// True for formats where the nominal rate counts fields, not frames.
    pub const fn is_field_based(self) -> bool {
        matches!(
            self,
            Interlacing::UpperFieldFirst
                | Interlacing::LowerFieldFirst
                | Interlacing::InterlacedMerged
        )
    }
}

// ── VideoMode ────────────────────────────────────────────────────

/// Spatial arrangement of substreams (tiles) within one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoMode {
    Normal,
    DualLink,
    Stereo,
    ThreeByOne,
    Tiled4K,
}

impl VideoMode {
    const fn geometry(self) -> (usize, usize, &'static str) {
        match self {
            VideoMode::Normal => (1, 1, "normal"),
            VideoMode::DualLink => (1, 2, "dual-link"),
            VideoMode::Stereo => (2, 1, "3D"),
            VideoMode::ThreeByOne => (3, 1, "3x1"),
            VideoMode::Tiled4K => (2, 2, "tiled-4k"),
        }
    }

    pub const fn tiles_x(self) -> usize {
        self.geometry().0
    }

    pub const fn tiles_y(self) -> usize {
        self.geometry().1
    }

    pub const fn tile_count(self) -> usize {
        self.tiles_x() * self.tiles_y()
    }

    pub const fn name(self) -> &'static str {
        self.geometry().2
    }

    /// Infer the mode from an observed substream count.
    ///
    /// The sender always starts a frame with the highest substream index,
    /// so `highest_index + 1` is a valid guess.
    pub fn guess(substreams: u32) -> Result<Self, DecodeError> {
        match substreams {
            1 => Ok(VideoMode::Normal),
            2 => Ok(VideoMode::Stereo),
            3 => Ok(VideoMode::ThreeByOne),
            4 => Ok(VideoMode::Tiled4K),
            n => Err(DecodeError::UnsupportedSubstreamCount(n)),
        }
    }
}

impl fmt::Display for VideoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── VideoDesc ────────────────────────────────────────────────────

/// Full description of a video stream as advertised by its headers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoDesc {
    /// Width of one tile in pixels.
    pub width: u32,
    /// Height of one tile in pixels.
    pub height: u32,
    pub fps: f64,
    pub interlacing: Interlacing,
    pub color_spec: ColorSpec,
    /// Number of substreams; inferred from the highest substream index
    /// seen.
    pub tile_count: u32,
}

impl VideoDesc {
    /// Field-wise equality ignoring `tile_count`, which is a running
    /// inference rather than an advertised property. Used for upstream
    /// format-change detection.
    pub fn eq_excl_tile_count(&self, other: &VideoDesc) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.fps == other.fps
            && self.interlacing == other.interlacing
            && self.color_spec == other.color_spec
    }
}

impl fmt::Display for VideoDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Field-based modes are conventionally quoted at field rate.
        let rate = if self.interlacing.is_field_based() {
            self.fps * 2.0
        } else {
            self.fps
        };
        write!(
            f,
            "{}x{} @{:.2}{}, codec {}",
            self.width,
            self.height,
            rate,
            self.interlacing.suffix(),
            self.color_spec
        )
    }
}

// ── Frame-rate fraction ──────────────────────────────────────────

/// Decode the NTSC-style fps fraction from header word 5.
///
/// `fps = (fps_pt + fd) / (fpsd * (fi ? 1.001 : 1))`
pub fn fps_from_fraction(fps_pt: u32, fpsd: u32, fd: bool, fi: bool) -> f64 {
    let num = fps_pt as f64 + fd as u8 as f64;
    let den = fpsd.max(1) as f64 * if fi { 1.001 } else { 1.0 };
    num / den
}

/// Encode an fps value into the header fraction `(fps_pt, fpsd, fd, fi)`.
///
/// Integer rates encode exactly; NTSC rates (29.97, 59.94, 23.976) use
/// the `1.001` divisor flag. Anything else rounds to the nearest integer
/// rate.
pub fn fps_to_fraction(fps: f64) -> (u32, u32, bool, bool) {
    let rounded = fps.round();
    if (fps - rounded).abs() < 1e-6 {
        return (rounded as u32, 1, false, false);
    }
    let ntsc = fps * 1.001;
    if (ntsc - ntsc.round()).abs() < 1e-3 {
        return (ntsc.round() as u32, 1, false, true);
    }
    (rounded as u32, 1, false, false)
}
