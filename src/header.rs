//! Wire headers of the video RTP profile.
//!
//! All words are network byte order. The plain video header is six words:
//!
//! ```text
//! word 0:  substream (31..22) | buffer number (21..0)
//! word 1:  byte offset of this packet's payload within the substream
//! word 2:  total substream byte length
//! word 3:  width (31..16) | height (15..0)
//! word 4:  codec FourCC (raw bytes)
//! word 5:  interlacing (31..29) | fps_pt (28..19) | fpsd (18..15)
//!          | fd (14) | fi (13)
//! ```
//!
//! FEC-protected payloads replace words 3..5 with a two-word FEC
//! descriptor, giving a five-word header:
//!
//! ```text
//! word 3:  k (31..19) | m (18..6) | c (5..0)
//! word 4:  seed
//! ```
//!
//! The full six-word video header of a FEC stream travels *inside* the
//! protected payload and resurfaces after reconstruction.
//!
//! Encrypted variants insert one crypto word between the media header and
//! the ciphertext; its high byte selects the cipher mode.

use bytes::{Buf, BufMut};

use crate::desc::{
    fps_from_fraction, fps_to_fraction, ColorSpec, Interlacing, VideoDesc,
};
use crate::error::DecodeError;
use crate::fec::FecKind;

/// Size of the plain video payload header in bytes.
pub const VIDEO_HDR_LEN: usize = 24;
/// Size of the FEC payload header in bytes.
pub const FEC_HDR_LEN: usize = 20;
/// Size of the crypto word in bytes.
pub const CRYPTO_HDR_LEN: usize = 4;

/// Modulus of the wrap-around buffer (frame) number.
pub const BUFFER_NUM_MODULO: u32 = 1 << 22;

// ── PayloadType ──────────────────────────────────────────────────

/// RTP payload types of the video profile.
///
/// Encoded so that bit `0x08` means "encrypted" and the low two bits select
/// the FEC scheme — the flags are orthogonal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadType {
    Video = 20,
    VideoRs = 21,
    VideoLdgm = 22,
    EncryptedVideo = 28,
    EncryptedVideoRs = 29,
    EncryptedVideoLdgm = 30,
}

impl PayloadType {
    pub fn from_u8(pt: u8) -> Result<Self, DecodeError> {
        match pt {
            20 => Ok(PayloadType::Video),
            21 => Ok(PayloadType::VideoRs),
            22 => Ok(PayloadType::VideoLdgm),
            28 => Ok(PayloadType::EncryptedVideo),
            29 => Ok(PayloadType::EncryptedVideoRs),
            30 => Ok(PayloadType::EncryptedVideoLdgm),
            other => Err(DecodeError::UnknownPayloadType(other)),
        }
    }

    pub const fn is_encrypted(self) -> bool {
        self as u8 & 0x08 != 0
    }

    pub const fn fec_kind(self) -> Option<FecKind> {
        match self as u8 & 0x03 {
            1 => Some(FecKind::ReedSolomon),
            2 => Some(FecKind::Ldgm),
            _ => None,
        }
    }

    pub const fn has_fec(self) -> bool {
        self.fec_kind().is_some()
    }

    /// Length of the media header carried by packets of this type.
    pub const fn media_hdr_len(self) -> usize {
        if self.has_fec() {
            FEC_HDR_LEN
        } else {
            VIDEO_HDR_LEN
        }
    }
}

// ── VideoHeader ──────────────────────────────────────────────────

/// Parsed plain video payload header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoHeader {
    /// Substream (tile) index, 10 bits.
    pub substream: u32,
    /// Wrap-around frame identifier, 22 bits.
    pub buffer_num: u32,
    /// Byte offset of this packet's payload within the substream.
    pub offset: u32,
    /// Total substream byte length (wire word 2).
    pub length: u32,
    pub width: u16,
    pub height: u16,
    pub fourcc: [u8; 4],
    pub interlacing: Interlacing,
    pub fps: f64,
}

/// Reject a buffer shorter than a fixed-size header.
fn check_len(data: &[u8], need: usize) -> Result<(), DecodeError> {
    if data.len() < need {
        return Err(DecodeError::Truncated { need, got: data.len() });
    }
    Ok(())
}

impl VideoHeader {
    /// Parse the leading [`VIDEO_HDR_LEN`] bytes of a packet.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        check_len(data, VIDEO_HDR_LEN)?;
        let mut buf = data;
        let w0 = buf.get_u32();
        let offset = buf.get_u32();
        let length = buf.get_u32();
        let w3 = buf.get_u32();
        let mut fourcc = [0u8; 4];
        buf.copy_to_slice(&mut fourcc);
        let w5 = buf.get_u32();

        let interlacing = Interlacing::from_tag((w5 >> 29) as u8)?;
        let fps_pt = (w5 >> 19) & 0x3ff;
        let fpsd = (w5 >> 15) & 0xf;
        let fd = w5 & (1 << 14) != 0;
        let fi = w5 & (1 << 13) != 0;

        Ok(VideoHeader {
            substream: w0 >> 22,
            buffer_num: w0 & (BUFFER_NUM_MODULO - 1),
            offset,
            length,
            width: (w3 >> 16) as u16,
            height: (w3 & 0xffff) as u16,
            fourcc,
            interlacing,
            fps: fps_from_fraction(fps_pt, fpsd, fd, fi),
        })
    }

    /// Serialize into `out` (append).
    pub fn encode(&self, out: &mut Vec<u8>) {
        let (fps_pt, fpsd, fd, fi) = fps_to_fraction(self.fps);
        out.put_u32(self.substream << 22 | (self.buffer_num & (BUFFER_NUM_MODULO - 1)));
        out.put_u32(self.offset);
        out.put_u32(self.length);
        out.put_u32((self.width as u32) << 16 | self.height as u32);
        out.extend_from_slice(&self.fourcc);
        out.put_u32(
            (self.interlacing.tag() as u32) << 29
                | (fps_pt & 0x3ff) << 19
                | (fpsd & 0xf) << 15
                | (fd as u32) << 14
                | (fi as u32) << 13,
        );
    }

    /// Resolve the stream descriptor this header advertises.
    ///
    /// The tile count is inferred from the substream index, which is valid
    /// because the sender emits the highest substream first.
    pub fn desc(&self) -> Result<VideoDesc, DecodeError> {
        Ok(VideoDesc {
            width: self.width as u32,
            height: self.height as u32,
            fps: self.fps,
            interlacing: self.interlacing,
            color_spec: ColorSpec::from_fourcc(self.fourcc)?,
            tile_count: self.substream + 1,
        })
    }
}

// ── FecHeader ────────────────────────────────────────────────────

/// Parsed FEC payload header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FecHeader {
    pub substream: u32,
    pub buffer_num: u32,
    pub offset: u32,
    pub length: u32,
    pub k: u32,
    pub m: u32,
    pub c: u32,
    pub seed: u32,
}

impl FecHeader {
    /// Parse the leading [`FEC_HDR_LEN`] bytes of a packet.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        check_len(data, FEC_HDR_LEN)?;
        let mut buf = data;
        let w0 = buf.get_u32();
        let offset = buf.get_u32();
        let length = buf.get_u32();
        let w3 = buf.get_u32();
        let seed = buf.get_u32();

        Ok(FecHeader {
            substream: w0 >> 22,
            buffer_num: w0 & (BUFFER_NUM_MODULO - 1),
            offset,
            length,
            k: w3 >> 19,
            m: (w3 >> 6) & 0x1fff,
            c: w3 & 0x3f,
            seed,
        })
    }

    /// Serialize into `out` (append).
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.put_u32(self.substream << 22 | (self.buffer_num & (BUFFER_NUM_MODULO - 1)));
        out.put_u32(self.offset);
        out.put_u32(self.length);
        out.put_u32(self.k << 19 | (self.m & 0x1fff) << 6 | (self.c & 0x3f));
        out.put_u32(self.seed);
    }
}

// ── Crypto word ──────────────────────────────────────────────────

/// Extract the cipher mode from the crypto word following the media header.
///
/// Mode 0 and out-of-range values are rejected.
pub fn parse_crypto_word(data: &[u8]) -> Result<crate::decrypt::CipherMode, DecodeError> {
    check_len(data, CRYPTO_HDR_LEN)?;
    let mut buf = data;
    let word = buf.get_u32();
    crate::decrypt::CipherMode::from_u8((word >> 24) as u8)
}
