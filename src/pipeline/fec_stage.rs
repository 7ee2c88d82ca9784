//! FEC worker: reconstructs original payloads from received block
//! fragments, re-parses the inner video header and produces the "no-FEC"
//! view of the frame.
//!
//! Streams without FEC pass through with tile views aliased into the
//! received buffers plus completeness accounting.

use std::sync::atomic::Ordering;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, warn};

use crate::desc::VideoDesc;
use crate::fec::{FecDesc, FecEngine};
use crate::header::{VideoHeader, VIDEO_HDR_LEN};
use crate::msg::{FrameMsg, FramePayload, NofecSource, NofecTile, ReconfigureRequest};
use crate::pipeline::{DecoderKind, Shared};

enum Outcome {
    /// Hand the frame to the decompress queue.
    Forward,
    /// Drop the frame; `release_gate` when the swap gate was claimed for a
    /// line-path write that did not complete.
    Drop { release_gate: bool },
    /// The reconstructed inner header advertises a different stream format;
    /// request reconfiguration and retry this frame.
    Requeue(VideoDesc),
}

pub(crate) fn run(
    shared: &Shared,
    fec_rx: &Receiver<FrameMsg>,
    dec_tx: &Sender<FrameMsg>,
    reconf_tx: &Sender<ReconfigureRequest>,
) {
    let mut engine: Option<(FecDesc, Box<dyn FecEngine>)> = None;

    while let Ok(msg) = fec_rx.recv() {
        let mut payload = match msg {
            FrameMsg::Poison => {
                // Forward the poison so the decompress worker exits too.
                let _ = dec_tx.send(FrameMsg::Poison);
                break;
            }
            FrameMsg::Frame(payload) => payload,
        };

        let started = Instant::now();
        match process(shared, &mut engine, &mut payload) {
            Outcome::Forward => {
                payload.nano_error_correction = started.elapsed().as_nanos() as u64;
                if dec_tx.send(FrameMsg::Frame(payload)).is_err() {
                    break;
                }
            }
            Outcome::Drop { release_gate } => {
                if release_gate {
                    shared.swap.release();
                }
            }
            Outcome::Requeue(desc) => {
                let _ = reconf_tx.send(ReconfigureRequest {
                    desc,
                    last_frame: Some(FrameMsg::Frame(payload)),
                    force: false,
                });
            }
        }
    }
}

fn process(
    shared: &Shared,
    engine: &mut Option<(FecDesc, Box<dyn FecEngine>)>,
    p: &mut FramePayload,
) -> Outcome {
    let tile_count = p.recv.tiles.len();

    let Some(kind) = p.recv.fec.kind else {
        return pass_through(p, tile_count);
    };
    let fec_desc = p.recv.fec;

    // (Re)create the engine when any FEC parameter changed.
    let stale = match engine {
        Some((desc, _)) => *desc != fec_desc,
        None => true,
    };
    if stale {
        let created = shared
            .codecs
            .fec_factory(kind)
            .ok_or_else(|| error!("unable to initialize FEC: no {kind} engine registered"))
            .and_then(|factory| {
                factory.create(&fec_desc).map_err(|e| error!("unable to initialize FEC: {e}"))
            });
        match created {
            Ok(built) => *engine = Some((fec_desc, built)),
            Err(()) => {
                shared.fatal.store(true, Ordering::Relaxed);
                shared
                    .control
                    .report_event("RECV error - FEC initialization failed");
                return Outcome::Drop { release_gate: false };
            }
        }
    }
    let (_, engine) = engine.as_mut().expect("engine just built");

    // Reconstruct every substream before touching shared state.
    let mut outs: Vec<Vec<u8>> = Vec::with_capacity(tile_count);
    let mut inner_desc: Option<VideoDesc> = None;
    for i in 0..tile_count {
        let tile = &p.recv.tiles[i];
        let received = p.received_bytes(i);
        if received != tile.data_len as u64 {
            debug!(
                "frame incomplete - substream {i}: expected {} bytes, got {received}",
                tile.data_len,
            );
        }

        let Some(data) = tile.data.as_deref() else {
            debug!("FEC substream {i} carries no data");
            p.is_corrupted = true;
            return Outcome::Drop { release_gate: false };
        };
        let block = &data[..tile.data_len.min(data.len())];
        let Some(out) = engine
            .decode(block, &p.pckt_list[i])
            .filter(|out| !out.is_empty())
        else {
            debug!("FEC: unable to reconstruct data");
            p.is_corrupted = true;
            return Outcome::Drop { release_gate: false };
        };

        // The first word of the recovered payload is the inner video
        // header.
        if inner_desc.is_none() {
            let desc = VideoHeader::parse(&out).and_then(|hdr| hdr.desc());
            match desc {
                Ok(desc) => inner_desc = Some(desc),
                Err(e) => {
                    warn!("{e}; dropping reconstructed frame");
                    p.is_corrupted = true;
                    return Outcome::Drop { release_gate: false };
                }
            }
        }
        if out.len() < VIDEO_HDR_LEN {
            debug!("FEC output shorter than the inner header");
            p.is_corrupted = true;
            return Outcome::Drop { release_gate: false };
        }
        outs.push(out);
    }

    // Mid-stream format change detected inside the protected payload.
    let inner = inner_desc.expect("at least one tile");
    let differs = match *shared.fmt.lock().expect("format lock") {
        Some(current) => !current.eq_excl_tile_count(&inner),
        None => true,
    };
    if differs {
        return Outcome::Requeue(inner);
    }

    let Some(cfg) = p.cfg.clone() else {
        return Outcome::Drop { release_gate: false };
    };

    match &cfg.kind {
        DecoderKind::External { .. } => {
            for out in &outs {
                p.nofec.push(NofecTile {
                    source: NofecSource::FecOut,
                    offset: VIDEO_HDR_LEN,
                    len: out.len() - VIDEO_HDR_LEN,
                });
            }
            p.fec_out = outs;
            Outcome::Forward
        }
        DecoderKind::Line(decoders) => {
            // Write the recovered payloads straight into the framebuffer.
            shared.swap.claim();
            let mut guard = shared.frame.lock().expect("frame lock");
            let Some(framebuffer) = guard.as_mut() else {
                return Outcome::Drop { release_gate: true };
            };
            let divisor = if cfg.merged_fb { 1 } else { cfg.max_substreams };
            for (i, out) in outs.iter().enumerate() {
                let (Some(tile), Some(ld)) = (
                    framebuffer.tiles.get_mut(i % divisor.max(1)),
                    decoders.get(i),
                ) else {
                    return Outcome::Drop { release_gate: true };
                };
                ld.decode_buffer(tile, &out[VIDEO_HDR_LEN..]);
            }
            drop(guard);
            for out in &outs {
                p.nofec.push(NofecTile {
                    source: NofecSource::FecOut,
                    offset: VIDEO_HDR_LEN,
                    len: out.len() - VIDEO_HDR_LEN,
                });
            }
            p.fec_out = outs;
            Outcome::Forward
        }
    }
}

/// No FEC: alias tile views into the received frame and account for
/// completeness.
fn pass_through(p: &mut FramePayload, tile_count: usize) -> Outcome {
    let accepts_corrupted = p.cfg.as_deref().and_then(|cfg| match cfg.kind {
        DecoderKind::External { accepts_corrupted } => Some(accepts_corrupted),
        DecoderKind::Line(_) => None,
    });

    for i in 0..tile_count {
        let tile = &p.recv.tiles[i];
        p.nofec.push(NofecTile {
            source: NofecSource::Recv,
            offset: 0,
            len: tile.data_len,
        });
        let received = p.received_bytes(i);
        if received != tile.data_len as u64 {
            let dropped = accepts_corrupted == Some(false);
            debug!(
                "frame incomplete - substream {i}: expected {} bytes, got {received}{}",
                tile.data_len,
                if dropped { " - dropped" } else { "" },
            );
            p.is_corrupted = true;
            if dropped {
                return Outcome::Drop { release_gate: false };
            }
        }
    }
    Outcome::Forward
}
