//! Per-line pixel transforms and interlacing converters.
//!
//! Line transforms operate at byte granularity: the destination slice
//! length is authoritative, the source is consumed proportionally to the
//! `src_bpp / dst_bpp` ratio and clamped to what is available. This lets
//! the ingress stage decode packets that start or end mid-line.
//!
//! Interlacing converters rewrite a whole tile in place (the contract
//! requires tolerating `dst == src`, which in-place operation satisfies
//! by construction); they keep a scratch buffer across frames in
//! [`IlState`].

use crate::desc::ColorSpec;
use crate::display::RgbShift;

/// A per-line pixel transform.
///
/// Writes exactly `dst.len()` bytes (less if `src` runs short) and
/// applies the display's RGB channel shifts where the output has them.
pub type LineDecodeFn = fn(dst: &mut [u8], src: &[u8], shift: RgbShift);

/// One row of the line-transform registry.
#[derive(Clone, Copy)]
pub struct LineTransform {
    pub from: ColorSpec,
    pub to: ColorSpec,
    /// Slow transforms are only picked when no fast path exists.
    pub slow: bool,
    pub func: LineDecodeFn,
}

// ── Straight copies ──────────────────────────────────────────────

/// Byte-for-byte copy for identical source and destination layouts.
pub fn copy_line(dst: &mut [u8], src: &[u8], _shift: RgbShift) {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
}

/// RGBA → RGBA re-packing the channels at the requested shifts.
pub fn copy_line_rgba(dst: &mut [u8], src: &[u8], shift: RgbShift) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let word = (s[0] as u32) << shift.r | (s[1] as u32) << shift.g | (s[2] as u32) << shift.b;
        d.copy_from_slice(&word.to_le_bytes());
    }
}

/// RGB → RGB honoring non-default channel shifts.
pub fn copy_line_rgb(dst: &mut [u8], src: &[u8], shift: RgbShift) {
    if shift == RgbShift::default() {
        copy_line(dst, src, shift);
        return;
    }
    for (d, s) in dst.chunks_exact_mut(3).zip(src.chunks_exact(3)) {
        d[(shift.r / 8) as usize] = s[0];
        d[(shift.g / 8) as usize] = s[1];
        d[(shift.b / 8) as usize] = s[2];
    }
}

// ── Format conversions ───────────────────────────────────────────

/// RGBA → RGB, dropping alpha.
pub fn line_rgba_to_rgb(dst: &mut [u8], src: &[u8], _shift: RgbShift) {
    for (d, s) in dst.chunks_exact_mut(3).zip(src.chunks_exact(4)) {
        d.copy_from_slice(&s[..3]);
    }
}

/// RGB → RGBA at the requested shifts, alpha zeroed.
pub fn line_rgb_to_rgba(dst: &mut [u8], src: &[u8], shift: RgbShift) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(3)) {
        let word = (s[0] as u32) << shift.r | (s[1] as u32) << shift.g | (s[2] as u32) << shift.b;
        d.copy_from_slice(&word.to_le_bytes());
    }
}

/// YUYV → UYVY byte swizzle.
pub fn line_yuyv_to_uyvy(dst: &mut [u8], src: &[u8], _shift: RgbShift) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        d[0] = s[1];
        d[1] = s[0];
        d[2] = s[3];
        d[3] = s[2];
    }
}

/// UYVY → YUYV byte swizzle.
pub fn line_uyvy_to_yuyv(dst: &mut [u8], src: &[u8], shift: RgbShift) {
    // Same swap in the other direction.
    line_yuyv_to_uyvy(dst, src, shift);
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// UYVY → RGBA (BT.601), applying the display's channel shifts.
pub fn line_uyvy_to_rgba(dst: &mut [u8], src: &[u8], shift: RgbShift) {
    for (d, s) in dst.chunks_exact_mut(8).zip(src.chunks_exact(4)) {
        let u = s[0] as i32 - 128;
        let v = s[2] as i32 - 128;
        for (px, &y) in [s[1], s[3]].iter().enumerate() {
            let c = 298 * (y as i32 - 16);
            let r = clamp_u8((c + 409 * v + 128) >> 8) as u32;
            let g = clamp_u8((c - 100 * u - 208 * v + 128) >> 8) as u32;
            let b = clamp_u8((c + 516 * u + 128) >> 8) as u32;
            let word = r << shift.r | g << shift.g | b << shift.b;
            d[px * 4..px * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
    }
}

/// The transforms this crate ships with.
pub fn builtin_line_transforms() -> Vec<LineTransform> {
    use ColorSpec::*;
    vec![
        LineTransform { from: Rgba, to: Rgb, slow: false, func: line_rgba_to_rgb },
        LineTransform { from: Rgb, to: Rgba, slow: false, func: line_rgb_to_rgba },
        LineTransform { from: Yuyv, to: Uyvy, slow: false, func: line_yuyv_to_uyvy },
        LineTransform { from: Uyvy, to: Yuyv, slow: false, func: line_uyvy_to_yuyv },
        LineTransform { from: Uyvy, to: Rgba, slow: true, func: line_uyvy_to_rgba },
    ]
}

// ── Interlacing converters ───────────────────────────────────────

/// Per-substream scratch state for interlacing conversion.
#[derive(Debug, Default, Clone)]
pub struct IlState {
    scratch: Vec<u8>,
}

/// In-place interlacing converter for one tile.
pub type ChangeIlFn = fn(buf: &mut [u8], linesize: usize, height: usize, state: &mut IlState);

fn with_scratch(
    buf: &mut [u8],
    linesize: usize,
    height: usize,
    state: &mut IlState,
    map: impl Fn(usize, usize) -> usize,
) {
    let used = linesize * height;
    if buf.len() < used {
        return;
    }
    state.scratch.resize(used, 0);
    let half = height / 2;
    for dst_row in 0..height {
        let src_row = map(dst_row, half);
        state.scratch[dst_row * linesize..(dst_row + 1) * linesize]
            .copy_from_slice(&buf[src_row * linesize..(src_row + 1) * linesize]);
    }
    buf[..used].copy_from_slice(&state.scratch);
}

/// Field-sequential (lower field stored first) → merged line interleave.
pub fn il_lower_to_merged(buf: &mut [u8], linesize: usize, height: usize, state: &mut IlState) {
    with_scratch(buf, linesize, height, state, |row, half| {
        if row % 2 == 0 {
            half + row / 2 // upper field, stored second
        } else {
            row / 2
        }
    });
}

/// Field-sequential (upper field stored first) → merged line interleave.
pub fn il_upper_to_merged(buf: &mut [u8], linesize: usize, height: usize, state: &mut IlState) {
    with_scratch(buf, linesize, height, state, |row, half| {
        if row % 2 == 0 {
            row / 2
        } else {
            half + row / 2
        }
    });
}

/// Merged line interleave → field-sequential, upper field first.
pub fn il_merged_to_upper(buf: &mut [u8], linesize: usize, height: usize, state: &mut IlState) {
    with_scratch(buf, linesize, height, state, |row, half| {
        if row < half {
            row * 2
        } else {
            (row - half) * 2 + 1
        }
    });
}
