//! Decoder reconfiguration: codec and interlacing selection, display
//! renegotiation, and rebuilding the per-substream decoder tables.
//!
//! Reconfiguration always runs in the ingress context. It flushes the
//! pipeline by stopping and restarting both workers, so the stage snapshot
//! can be replaced without the workers observing a half-built state.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::codecs::Codecs;
use crate::decoder::VideoDecoder;
use crate::decompress::DecompressorFactory;
use crate::desc::{ColorSpec, Interlacing, VideoDesc, VideoMode};
use crate::display::{FramebufferLayout, PutPolicy, RgbShift};
use crate::error::DecodeError;
use crate::pipeline::{DecoderKind, LineDecoder, StageConfig};
use crate::transform::{
    copy_line, copy_line_rgb, copy_line_rgba, il_lower_to_merged, il_merged_to_upper,
    il_upper_to_merged, ChangeIlFn, IlState, LineDecodeFn,
};

// ── Codec selection ──────────────────────────────────────────────

/// How the selected output codec will be produced.
pub(crate) enum Selection {
    Line(LineDecodeFn),
    External(Arc<dyn DecompressorFactory>),
}

pub(crate) struct CodecChoice {
    pub out_codec: ColorSpec,
    pub selection: Selection,
}

/// Pick an output codec from the display's native list, in priority order:
/// exact pixel-format match, registered fast line transform, slow line
/// transform, external decompressor.
///
/// DXT formats cannot be line-placed into a multi-tile framebuffer, so the
/// exact-match tier skips them outside normal mode.
pub(crate) fn select_codec(
    natives: &[Option<ColorSpec>],
    codecs: &Codecs,
    src: ColorSpec,
    video_mode: VideoMode,
) -> Result<CodecChoice, DecodeError> {
    for out in natives.iter().flatten().copied() {
        if out == src {
            if out.is_dxt() && video_mode != VideoMode::Normal {
                continue;
            }
            let func: LineDecodeFn = match out {
                ColorSpec::Rgba => copy_line_rgba,
                ColorSpec::Rgb => copy_line_rgb,
                _ => copy_line,
            };
            return Ok(CodecChoice { out_codec: out, selection: Selection::Line(func) });
        }
    }

    for include_slow in [false, true] {
        for out in natives.iter().flatten().copied() {
            if let Some(func) = codecs.line_transform(src, out, include_slow) {
                return Ok(CodecChoice { out_codec: out, selection: Selection::Line(func) });
            }
        }
    }

    for out in natives.iter().flatten().copied() {
        if let Some(factory) = codecs.decompressor_for(src, out) {
            return Ok(CodecChoice { out_codec: out, selection: Selection::External(factory) });
        }
    }

    Err(DecodeError::NoDecoder(src))
}

// ── Interlacing selection ────────────────────────────────────────

/// Pick an interlacing conversion, or none when the display supports the
/// source mode natively. When no path exists the stream continues
/// unconverted, with a warning.
pub(crate) fn select_il_change(
    input: Interlacing,
    supported: &[Interlacing],
) -> (Option<ChangeIlFn>, Interlacing) {
    if supported.contains(&input) {
        return (None, input);
    }

    use Interlacing::{InterlacedMerged, LowerFieldFirst, UpperFieldFirst};
    const TRANSCODE: [(Interlacing, Interlacing, ChangeIlFn); 3] = [
        (LowerFieldFirst, InterlacedMerged, il_lower_to_merged),
        (UpperFieldFirst, InterlacedMerged, il_upper_to_merged),
        (InterlacedMerged, UpperFieldFirst, il_merged_to_upper),
    ];

    for &out in supported {
        for (from, to, func) in TRANSCODE {
            if input == from && out == to {
                return (Some(func), to);
            }
        }
    }

    warn!("cannot find transition between incoming and display interlacing modes");
    (None, input)
}

// ── Line-decoder table ───────────────────────────────────────────

fn build_line_decoders(
    desc: &VideoDesc,
    out_codec: ColorSpec,
    func: LineDecodeFn,
    shift: RgbShift,
    pitch: usize,
    layout: FramebufferLayout,
    mode: VideoMode,
) -> Arc<[LineDecoder]> {
    let (tiles_x, tiles_y) = (mode.tiles_x(), mode.tiles_y());
    let src_linesize = desc.color_spec.linesize(desc.width as usize);
    let dst_linesize = out_codec.linesize(desc.width as usize);

    let mut table = Vec::with_capacity(tiles_x * tiles_y);
    for y in 0..tiles_y {
        for x in 0..tiles_x {
            let (base_offset, dst_pitch) = match layout {
                FramebufferLayout::Merged => (
                    y * desc.height as usize * pitch
                        + out_codec.linesize(x * desc.width as usize),
                    pitch,
                ),
                FramebufferLayout::SeparateTiles => (0, dst_linesize),
            };
            table.push(LineDecoder {
                base_offset,
                src_bpp: desc.color_spec.bpp(),
                dst_bpp: out_codec.bpp(),
                shift,
                decode_line: func,
                src_linesize,
                dst_linesize,
                dst_pitch,
            });
        }
    }
    table.into()
}

// ── Reconfiguration proper ───────────────────────────────────────

impl VideoDecoder {
    pub(crate) fn set_video_mode(&mut self, mode: VideoMode) {
        self.video_mode = mode;
        self.max_substreams = mode.tile_count();
    }

    /// Format-change check against a freshly parsed header descriptor.
    ///
    /// Returns `true` when a mid-stream change was handled — the caller
    /// stops processing the current frame. The very first configuration is
    /// not a change; the frame that established it continues decoding.
    pub(crate) fn check_format_change(&mut self, desc: VideoDesc) -> bool {
        let initial = self.received_desc.is_none();
        self.reconfigure_if_needed(desc, false) && !initial
    }

    /// Reconfigure when the descriptor differs (ignoring tile count) or on
    /// request. Returns whether a reconfiguration ran.
    pub(crate) fn reconfigure_if_needed(&mut self, desc: VideoDesc, force: bool) -> bool {
        let changed = match &self.received_desc {
            Some(current) => !current.eq_excl_tile_count(&desc),
            None => true,
        };
        if !changed && !force {
            return false;
        }

        if changed {
            info!("new incoming video format detected: {desc}");
            self.shared
                .control
                .report_event(&format!("RECV received video changed - {desc}"));
            self.received_desc = Some(desc);
            *self.shared.fmt.lock().expect("format lock") = Some(desc);
        }
        if force {
            debug!("forced reconfiguration");
        }

        let desc = self.received_desc.expect("descriptor present");
        if let Err(e) = self.reconfigure(desc) {
            error!("reconfiguration failed: {e}");
            // Stop decoding until the next successful reconfiguration.
            *self.shared.frame.lock().expect("frame lock") = None;
            self.cfg = None;
        }
        true
    }

    fn reconfigure(&mut self, mut desc: VideoDesc) -> Result<(), DecodeError> {
        // Flush pipelined frames, then return the held framebuffer.
        self.stop_workers();
        if let Some(frame) = self.shared.frame.lock().expect("frame lock").take() {
            self.shared.display.put_frame(frame, PutPolicy::Discard);
        }
        self.start_workers();

        // Tear down the previous decoder tables.
        self.shared.present.lock().expect("present lock").clear();
        *self.shared.current_out.lock().expect("out lock") = None;
        self.cfg = None;

        desc.tile_count = self.max_substreams as u32;

        let choice = {
            let natives = self.shared.natives.lock().expect("natives lock");
            select_codec(&natives, &self.shared.codecs, desc.color_spec, self.video_mode)?
        };

        let layout = self.shared.display.layout();
        let (tiles_x, tiles_y) = (self.video_mode.tiles_x(), self.video_mode.tiles_y());

        let mut display_desc = desc;
        if layout == FramebufferLayout::Merged {
            display_desc.width = desc.width * tiles_x as u32;
            display_desc.height = desc.height * tiles_y as u32;
            display_desc.tile_count = 1;
        }
        let (change_il, display_il) = select_il_change(desc.interlacing, &self.supported_il);
        display_desc.color_spec = choice.out_codec;
        display_desc.interlacing = display_il;

        if self.display_desc != Some(display_desc) {
            if !self.shared.display.reconfigure(&display_desc, self.video_mode) {
                return Err(DecodeError::DisplayReconfigureFailed(display_desc));
            }
            debug!("successfully reconfigured display to {display_desc}");
            self.display_desc = Some(display_desc);
        }

        let shift = self.shared.display.rgb_shift();
        let linewidth = match layout {
            FramebufferLayout::SeparateTiles => desc.width as usize,
            FramebufferLayout::Merged => desc.width as usize * tiles_x,
        };
        let pitch = self
            .shared
            .display
            .pitch()
            .unwrap_or_else(|| choice.out_codec.linesize(linewidth));

        let (kind, merged_fb) = match choice.selection {
            Selection::Line(func) => (
                DecoderKind::Line(build_line_decoders(
                    &desc,
                    choice.out_codec,
                    func,
                    shift,
                    pitch,
                    layout,
                    self.video_mode,
                )),
                layout == FramebufferLayout::Merged,
            ),
            Selection::External(factory) => {
                let mut present = self.shared.present.lock().expect("present lock");
                let mut accepts_corrupted = false;
                for i in 0..self.max_substreams {
                    let mut decompressor = factory.create();
                    let buf_size =
                        decompressor.reconfigure(&desc, shift, pitch, choice.out_codec)?;
                    if i == 0 {
                        accepts_corrupted = decompressor.accepts_corrupted_frames();
                    }
                    present.scratch.push(vec![0u8; buf_size]);
                    present.decompressors.push(decompressor);
                }
                (
                    DecoderKind::External { accepts_corrupted },
                    layout != FramebufferLayout::SeparateTiles,
                )
            }
        };

        self.shared.present.lock().expect("present lock").il_state =
            vec![IlState::default(); self.max_substreams];
        *self.shared.current_out.lock().expect("out lock") = Some(choice.out_codec);

        self.cfg = Some(Arc::new(StageConfig {
            desc,
            video_mode: self.video_mode,
            max_substreams: self.max_substreams,
            kind,
            out_codec: choice.out_codec,
            pitch,
            merged_fb,
            change_il,
            drop_policy: self.options.drop_policy,
        }));

        // Receiver-subsystem notification.
        if let Some(notify) = &self.on_format_change {
            notify(&desc);
        }

        *self.shared.frame.lock().expect("frame lock") = Some(self.shared.display.get_frame());
        Ok(())
    }
}
