//! Decompress + present worker: terminal stage of the pipeline.
//!
//! Runs codec-specific decompression (in parallel per tile where the frame
//! has several), applies the interlacing conversion, and submits the frame
//! to the display. After every message, displayed or skipped, the swap
//! gate re-opens so the writer stages can start the next frame.

use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use rayon::prelude::*;
use tracing::debug;

use crate::decoder::DropPolicy;
use crate::decompress::DecompressStatus;
use crate::display::{DisplayFrame, PutPolicy, PutResult};
use crate::msg::{FrameMsg, FramePayload, ReconfigureRequest};
use crate::pipeline::{DecoderKind, Shared, StageConfig};

pub(crate) fn run(
    shared: &Shared,
    dec_rx: &Receiver<FrameMsg>,
    reconf_tx: &Sender<ReconfigureRequest>,
) {
    while let Ok(msg) = dec_rx.recv() {
        let mut payload = match msg {
            FrameMsg::Poison => break,
            FrameMsg::Frame(payload) => payload,
        };
        handle(shared, &mut payload, reconf_tx);
        // The framebuffer is free for the next frame whether or not this
        // one was presented.
        shared.swap.release();
    }
}

fn handle(shared: &Shared, p: &mut FramePayload, reconf_tx: &Sender<ReconfigureRequest>) {
    let Some(cfg) = p.cfg.clone() else {
        return;
    };
    let started = Instant::now();

    match &cfg.kind {
        DecoderKind::External { .. } => {
            if !decompress_tiles(shared, &cfg, p, reconf_tx) {
                return;
            }
        }
        DecoderKind::Line(_) => {
            // Pixels are already in the framebuffer; honor length
            // overrides reported through the no-FEC views.
            let mut guard = shared.frame.lock().expect("frame lock");
            let Some(framebuffer) = guard.as_mut() else {
                return;
            };
            if framebuffer.decoder_overrides_data_len {
                for (i, tile) in framebuffer.tiles.iter_mut().enumerate() {
                    if let Some(view) = p.nofec.get(i) {
                        tile.data_len = view.len;
                    }
                }
            }
        }
    }
    p.nano_decompress = started.elapsed().as_nanos() as u64;

    if let Some(change_il) = cfg.change_il {
        let mut present = shared.present.lock().expect("present lock");
        let mut guard = shared.frame.lock().expect("frame lock");
        if let Some(framebuffer) = guard.as_mut() {
            for (i, tile) in framebuffer.tiles.iter_mut().enumerate() {
                let Some(state) = present.il_state.get_mut(i) else {
                    break;
                };
                let linesize = cfg.out_codec.linesize(tile.width as usize);
                change_il(&mut tile.data, linesize, tile.height as usize, state);
            }
        }
    }

    // Present and fetch the next framebuffer.
    let taken = shared.frame.lock().expect("frame lock").take();
    let Some(mut frame) = taken else {
        return;
    };
    frame.ssrc = p.recv.ssrc;
    let policy = match cfg.drop_policy {
        DropPolicy::Nonblock => PutPolicy::Nonblock,
        DropPolicy::Blocking => PutPolicy::Blocking,
    };
    if shared.display.put_frame(frame, policy) == PutResult::Displayed {
        p.is_displayed = true;
    }
    *shared.frame.lock().expect("frame lock") = Some(shared.display.get_frame());
}

/// Run the external decompressors over every tile.
///
/// Returns `true` when all tiles produced a picture. `CantDecode`
/// blacklists the current output codec and requests a forced
/// reconfiguration; `NoFrame` skips presenting without penalty.
fn decompress_tiles(
    shared: &Shared,
    cfg: &StageConfig,
    p: &FramePayload,
    reconf_tx: &Sender<ReconfigureRequest>,
) -> bool {
    let mut present = shared.present.lock().expect("present lock");
    let present = &mut *present;
    let mut guard = shared.frame.lock().expect("frame lock");
    let Some(framebuffer) = guard.as_mut() else {
        return false;
    };

    let tile_count = cfg
        .max_substreams
        .min(present.decompressors.len())
        .min(p.recv.tiles.len());
    if tile_count == 0 {
        return false;
    }

    let statuses = if cfg.merged_fb {
        if tile_count == 1 {
            // Single tile decodes straight into the framebuffer.
            let status = match p.tile_bytes(0) {
                Some(src) => present.decompressors[0].decompress(
                    &mut framebuffer.tiles[0].data,
                    src,
                    p.buffer_num[0],
                ),
                None => DecompressStatus::NoFrame,
            };
            vec![status]
        } else {
            // Parallel per-tile decode into scratch, then blit the rows
            // into the merged framebuffer.
            let payload: &FramePayload = p;
            let decompressors = &mut present.decompressors[..tile_count];
            let scratch = &mut present.scratch[..tile_count];
            let statuses: Vec<DecompressStatus> = decompressors
                .par_iter_mut()
                .zip(scratch.par_iter_mut())
                .enumerate()
                .map(|(i, (decompressor, buffer))| match payload.tile_bytes(i) {
                    Some(src) => decompressor.decompress(buffer, src, payload.buffer_num[i]),
                    None => DecompressStatus::NoFrame,
                })
                .collect();
            if statuses.iter().all(|s| *s == DecompressStatus::GotFrame) {
                blit_merged(framebuffer, &present.scratch[..tile_count], cfg);
            }
            statuses
        }
    } else {
        // Separate tiles decode in parallel, each into its own buffer.
        let payload: &FramePayload = p;
        let tiles = tile_count.min(framebuffer.tiles.len());
        let decompressors = &mut present.decompressors[..tiles];
        decompressors
            .par_iter_mut()
            .zip(framebuffer.tiles[..tiles].par_iter_mut())
            .enumerate()
            .map(|(i, (decompressor, tile))| match payload.tile_bytes(i) {
                Some(src) => decompressor.decompress(&mut tile.data, src, payload.buffer_num[i]),
                None => DecompressStatus::NoFrame,
            })
            .collect()
    };

    if statuses.iter().any(|s| *s == DecompressStatus::CantDecode) {
        if blacklist_current_out_codec(shared) {
            let _ = reconf_tx.send(ReconfigureRequest {
                desc: cfg.desc,
                last_frame: None,
                force: true,
            });
        }
        return false;
    }
    statuses.iter().all(|s| *s == DecompressStatus::GotFrame)
}

/// Copy decompressed tile rows from the scratch buffers into their slots
/// in the merged framebuffer.
fn blit_merged(framebuffer: &mut DisplayFrame, scratch: &[Vec<u8>], cfg: &StageConfig) {
    let Some(tile0) = framebuffer.tiles.first_mut() else {
        return;
    };
    let tiles_x = cfg.video_mode.tiles_x();
    let tile_w = cfg.desc.width as usize;
    let tile_h = cfg.desc.height as usize;
    let linesize = cfg.out_codec.linesize(tile_w);

    for (i, buffer) in scratch.iter().enumerate() {
        let x = i % tiles_x;
        let y = i / tiles_x;
        let base = y * cfg.pitch * tile_h + linesize * x;
        for row in 0..tile_h {
            let src = row * cfg.pitch;
            let dst = base + row * cfg.pitch;
            if src + linesize > buffer.len() || dst + linesize > tile0.data.len() {
                break;
            }
            tile0.data[dst..dst + linesize].copy_from_slice(&buffer[src..src + linesize]);
        }
    }
}

/// Remove the active output codec from the native list.
///
/// Returns `false` when there is no current codec (already blacklisted),
/// so repeated `CantDecode` results trigger only one forced
/// reconfiguration.
fn blacklist_current_out_codec(shared: &Shared) -> bool {
    let mut current = shared.current_out.lock().expect("out lock");
    let Some(codec) = current.take() else {
        return false;
    };
    let mut natives = shared.natives.lock().expect("natives lock");
    for slot in natives.iter_mut() {
        if *slot == Some(codec) {
            debug!("blacklisting codec {codec}");
            *slot = None;
        }
    }
    true
}
