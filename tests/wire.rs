//! Unit-level checks of the public wire and pixel-format API: header
//! round-trips, codec tables, line transforms, interlacing converters and
//! receive-buffer bookkeeping.

use bytes::BufMut;

use vidrx::desc::{fps_from_fraction, fps_to_fraction};
use vidrx::display::RgbShift;
use vidrx::error::DecodeError;
use vidrx::frame::{Tile, VideoFrame, DECOMPRESS_PADDING};
use vidrx::header::{
    parse_crypto_word, FecHeader, PayloadType, VideoHeader, BUFFER_NUM_MODULO, FEC_HDR_LEN,
    VIDEO_HDR_LEN,
};
use vidrx::transform::{
    copy_line, il_lower_to_merged, il_merged_to_upper, il_upper_to_merged, line_rgb_to_rgba,
    line_rgba_to_rgb, line_uyvy_to_rgba, line_uyvy_to_yuyv, line_yuyv_to_uyvy, IlState,
};
use vidrx::{Codecs, ColorSpec, FecKind, Interlacing, VideoDesc, VideoMode};

const ALL_CODECS: [ColorSpec; 12] = [
    ColorSpec::Rgba, ColorSpec::Rgb, ColorSpec::Uyvy, ColorSpec::Yuyv,
    ColorSpec::V210, ColorSpec::R10k, ColorSpec::Dxt1, ColorSpec::Dxt1Yuv,
    ColorSpec::Dxt5, ColorSpec::H264, ColorSpec::Jpeg, ColorSpec::Vp8,
];

// ── Descriptors ──────────────────────────────────────────────────

#[test]
fn fourcc_roundtrip() {
    for codec in ALL_CODECS {
        assert_eq!(ColorSpec::from_fourcc(codec.fourcc()).unwrap(), codec);
    }
    assert!(matches!(
        ColorSpec::from_fourcc(*b"nope"),
        Err(DecodeError::UnknownFourcc(_))
    ));
}

#[test]
fn linesize_matches_bpp_and_is_monotone() {
    assert_eq!(ColorSpec::Rgba.linesize(1920), 1920 * 4);
    assert_eq!(ColorSpec::Rgb.linesize(3), 9);
    // 48-pixel blocks of 128 bytes
    assert_eq!(ColorSpec::V210.linesize(48), 128);
    assert_eq!(ColorSpec::V210.linesize(49), 256);

    for codec in ALL_CODECS {
        let mut prev = 0;
        for w in 1..128 {
            let ls = codec.linesize(w);
            assert!(ls >= prev, "{codec}: linesize({w}) = {ls} < {prev}");
            prev = ls;
        }
    }
}

#[test]
fn video_mode_guess_table() {
    assert_eq!(VideoMode::guess(1).unwrap(), VideoMode::Normal);
    assert_eq!(VideoMode::guess(2).unwrap(), VideoMode::Stereo);
    assert_eq!(VideoMode::guess(3).unwrap(), VideoMode::ThreeByOne);
    assert_eq!(VideoMode::guess(4).unwrap(), VideoMode::Tiled4K);
    assert!(VideoMode::guess(5).is_err());
    assert_eq!(VideoMode::Tiled4K.tile_count(), 4);
    assert_eq!(VideoMode::DualLink.tile_count(), 2);
}

#[test]
fn fps_fraction_roundtrip() {
    for fps in [25.0, 30.0, 60.0] {
        let (pt, d, fd, fi) = fps_to_fraction(fps);
        assert!((fps_from_fraction(pt, d, fd, fi) - fps).abs() < 1e-9);
    }
    let (pt, d, fd, fi) = fps_to_fraction(30000.0 / 1001.0);
    assert!(fi);
    assert!((fps_from_fraction(pt, d, fd, fi) - 30000.0 / 1001.0).abs() < 1e-3);
}

#[test]
fn desc_formats_like_a_mode_line() {
    let desc = VideoDesc {
        width: 1920,
        height: 1080,
        fps: 25.0,
        interlacing: Interlacing::Progressive,
        color_spec: ColorSpec::Uyvy,
        tile_count: 1,
    };
    assert_eq!(desc.to_string(), "1920x1080 @25.00p, codec UYVY");
    // Field-based modes double the quoted rate.
    let fields = VideoDesc { interlacing: Interlacing::InterlacedMerged, ..desc };
    assert_eq!(fields.to_string(), "1920x1080 @50.00i, codec UYVY");

    assert!(desc.eq_excl_tile_count(&VideoDesc { tile_count: 4, ..desc }));
    assert!(!desc.eq_excl_tile_count(&VideoDesc { width: 1280, ..desc }));
}

#[test]
fn error_display_messages() {
    assert!(DecodeError::UnknownPayloadType(99).to_string().contains("99"));
    let e = DecodeError::Truncated { need: 24, got: 10 };
    assert!(e.to_string().contains("24") && e.to_string().contains("10"));
    assert!(DecodeError::UnknownFourcc(*b"Xj9\x01")
        .to_string()
        .contains("FourCC"));
}

// ── Wire headers ─────────────────────────────────────────────────

#[test]
fn payload_type_flags_are_orthogonal() {
    assert!(!PayloadType::Video.is_encrypted());
    assert!(!PayloadType::Video.has_fec());
    assert_eq!(PayloadType::VideoRs.fec_kind(), Some(FecKind::ReedSolomon));
    assert_eq!(PayloadType::VideoLdgm.fec_kind(), Some(FecKind::Ldgm));
    assert!(PayloadType::EncryptedVideo.is_encrypted());
    assert!(!PayloadType::EncryptedVideo.has_fec());
    assert_eq!(
        PayloadType::EncryptedVideoRs.fec_kind(),
        Some(FecKind::ReedSolomon)
    );
    assert!(PayloadType::from_u8(23).is_err());
    assert!(PayloadType::from_u8(0).is_err());
}

#[test]
fn video_header_roundtrip() {
    let hdr = VideoHeader {
        substream: 3,
        buffer_num: BUFFER_NUM_MODULO - 1,
        offset: 0x0102_0304,
        length: 4_147_200,
        width: 1920,
        height: 1080,
        fourcc: *b"UYVY",
        interlacing: Interlacing::InterlacedMerged,
        fps: 25.0,
    };
    let mut wire = Vec::new();
    hdr.encode(&mut wire);
    assert_eq!(wire.len(), VIDEO_HDR_LEN);

    let back = VideoHeader::parse(&wire).unwrap();
    assert_eq!(back, hdr);
    let desc = back.desc().unwrap();
    assert_eq!(desc.color_spec, ColorSpec::Uyvy);
    assert_eq!(desc.tile_count, 4);

    let bad = VideoHeader { fourcc: *b"????", ..hdr };
    assert!(matches!(bad.desc(), Err(DecodeError::UnknownFourcc(_))));
    assert!(matches!(
        VideoHeader::parse(&wire[..10]),
        Err(DecodeError::Truncated { need: 24, got: 10 })
    ));
}

#[test]
fn fec_header_roundtrip() {
    let hdr = FecHeader {
        substream: 1,
        buffer_num: 42,
        offset: 1400,
        length: 280_000,
        k: 4,
        m: 6,
        c: 5,
        seed: 0xdead_beef,
    };
    let mut wire = Vec::new();
    hdr.encode(&mut wire);
    assert_eq!(wire.len(), FEC_HDR_LEN);
    assert_eq!(FecHeader::parse(&wire).unwrap(), hdr);
    assert!(matches!(
        FecHeader::parse(&wire[..4]),
        Err(DecodeError::Truncated { need: 20, got: 4 })
    ));
}

#[test]
fn crypto_word_mode_in_high_byte() {
    let mut wire = Vec::new();
    wire.put_u32(2 << 24 | 0x1234);
    assert_eq!(parse_crypto_word(&wire).unwrap() as u8, 2);

    // Mode 0 and out-of-range values are rejected.
    assert!(parse_crypto_word(&0u32.to_be_bytes()).is_err());
    assert!(parse_crypto_word(&(9u32 << 24).to_be_bytes()).is_err());
}

// ── Receive buffers ──────────────────────────────────────────────

#[test]
fn write_at_allocates_lazily_and_rejects_overruns() {
    let mut tile = Tile {
        data_len: 100,
        ..Tile::default()
    };
    assert!(tile.data.is_none());
    assert!(tile.write_at(10, &[7u8; 20]));
    let buf = tile.data.as_ref().unwrap();
    assert_eq!(buf.len(), 100 + DECOMPRESS_PADDING);
    assert_eq!(&buf[10..30], &[7u8; 20]);
    assert_eq!((buf[9], buf[30]), (0, 0));

    // Past the advertised length: rejected, buffer untouched.
    assert!(!tile.write_at(95, &[0u8; 10]));

    let mut empty = Tile {
        data_len: 16,
        ..Tile::default()
    };
    assert!(!empty.write_at(10, &[0u8; 10]));
    assert!(empty.data.is_none());

    let mut frame = VideoFrame::new(2);
    frame.tiles[0].data_len = 100;
    frame.tiles[1].data_len = 50;
    assert_eq!(frame.data_len(), 150);
}

// ── Transform registry ───────────────────────────────────────────

#[test]
fn slow_transforms_hidden_unless_requested() {
    let codecs = Codecs::default();
    assert!(codecs
        .line_transform(ColorSpec::Uyvy, ColorSpec::Rgba, false)
        .is_none());
    assert!(codecs
        .line_transform(ColorSpec::Uyvy, ColorSpec::Rgba, true)
        .is_some());
    // Fast paths are visible either way.
    assert!(codecs
        .line_transform(ColorSpec::Rgba, ColorSpec::Rgb, false)
        .is_some());

    let empty = Codecs::empty();
    assert!(empty
        .line_transform(ColorSpec::Rgba, ColorSpec::Rgb, true)
        .is_none());
    assert!(empty.fec_factory(FecKind::Ldgm).is_none());
}

// ── Line transforms ──────────────────────────────────────────────

#[test]
fn pixel_transforms() {
    // copy clamps to the shorter side
    let mut dst = [0u8; 8];
    copy_line(&mut dst, &[1, 2, 3, 4], RgbShift::default());
    assert_eq!(dst, [1, 2, 3, 4, 0, 0, 0, 0]);

    // alpha dropped
    let mut rgb = [0u8; 6];
    line_rgba_to_rgb(&mut rgb, &[10, 20, 30, 255, 40, 50, 60, 255], RgbShift::default());
    assert_eq!(rgb, [10, 20, 30, 40, 50, 60]);

    // shifts honored
    let mut rgba = [0u8; 4];
    line_rgb_to_rgba(&mut rgba, &[10, 20, 30], RgbShift { r: 16, g: 8, b: 0 });
    assert_eq!(rgba, [30, 20, 10, 0]);

    // swizzle is involutive
    let src = [1u8, 2, 3, 4, 5, 6, 7, 8];
    let mut once = [0u8; 8];
    line_yuyv_to_uyvy(&mut once, &src, RgbShift::default());
    assert_eq!(once, [2, 1, 4, 3, 6, 5, 8, 7]);
    let mut twice = [0u8; 8];
    line_uyvy_to_yuyv(&mut twice, &once, RgbShift::default());
    assert_eq!(twice, src);

    // mid-gray YCbCr maps to gray RGB
    let mut gray = [0u8; 8];
    line_uyvy_to_rgba(&mut gray, &[128, 126, 128, 126], RgbShift::default());
    for &b in &[gray[0], gray[1], gray[2]] {
        assert!((125..=131).contains(&b), "channel {b} not gray");
    }
}

// ── Interlacing converters ───────────────────────────────────────

fn rows(height: usize, linesize: usize) -> Vec<u8> {
    (0..height)
        .flat_map(|r| std::iter::repeat(r as u8).take(linesize))
        .collect()
}

fn row_values(buf: &[u8], linesize: usize) -> Vec<u8> {
    buf.chunks(linesize).map(|c| c[0]).collect()
}

#[test]
fn interlacing_converters() {
    let (linesize, height) = (8, 6);
    let original = rows(height, linesize);
    let mut state = IlState::default();

    // merged → upper-first and back is the identity.
    let mut buf = original.clone();
    il_merged_to_upper(&mut buf, linesize, height, &mut state);
    assert_eq!(row_values(&buf, linesize), vec![0, 2, 4, 1, 3, 5]);
    il_upper_to_merged(&mut buf, linesize, height, &mut state);
    assert_eq!(buf, original);

    // Lower-field-first: the first stored field lands on odd lines.
    let mut buf = rows(4, 4);
    il_lower_to_merged(&mut buf, 4, 4, &mut state);
    assert_eq!(row_values(&buf, 4), vec![2, 0, 3, 1]);

    // In-place conversion equals converting a fresh copy.
    let mut in_place = original.clone();
    il_merged_to_upper(&mut in_place, linesize, height, &mut IlState::default());
    let mut out_of_place = original.clone();
    il_merged_to_upper(&mut out_of_place, linesize, height, &mut IlState::default());
    assert_eq!(in_place, out_of_place);
}
