//! Ingress stage: runs on the caller's receive thread.
//!
//! Parses per-packet headers, optionally decrypts the payload, detects
//! stream-format changes, and either writes uncompressed payloads straight
//! into the display framebuffer through the per-substream line decoders or
//! accumulates compressed / FEC-protected bytes into receive buffers. At
//! the end of the frame a [`FrameMsg`] is handed to the FEC queue.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::decoder::{BurstCounters, CodedPacket, VideoDecoder};
use crate::desc::VideoMode;
use crate::error::DecodeError;
use crate::fec::FecDesc;
use crate::frame::VideoFrame;
use crate::header::{parse_crypto_word, FecHeader, PayloadType, VideoHeader, CRYPTO_HDR_LEN};
use crate::msg::{FrameMsg, FramePayload};
use crate::pipeline::DecoderKind;
use crate::stats::missing_between;

/// Per-call assembly state for one reassembled frame.
struct FrameAssembly {
    frame: VideoFrame,
    pckt_list: Vec<BTreeMap<u32, u32>>,
    buffer_num: Vec<u32>,
    /// Whether this frame already claimed the framebuffer-swap gate.
    claimed_gate: bool,
    last_buffer_seen: Option<u32>,
    last_pt: Option<PayloadType>,
    fec: FecDesc,
    ssrc: u32,
}

impl FrameAssembly {
    fn new(max_substreams: usize) -> Self {
        FrameAssembly {
            frame: VideoFrame::new(max_substreams),
            pckt_list: (0..max_substreams).map(|_| BTreeMap::new()).collect(),
            buffer_num: vec![0; max_substreams],
            claimed_gate: false,
            last_buffer_seen: None,
            last_pt: None,
            fec: FecDesc::NONE,
            ssrc: 0,
        }
    }
}

/// Log a malformed-packet error and signal a frame drop.
fn drop_on<T>(result: Result<T, DecodeError>) -> Option<T> {
    result.map_err(|e| warn!("{e}; dropping frame")).ok()
}

impl VideoDecoder {
    /// Decode one reassembled frame worth of payload packets.
    ///
    /// Returns `Ok(true)` when the frame entered the pipeline, `Ok(false)`
    /// when it was dropped (the frame may still have been partially written
    /// to the framebuffer), and `Err` only for unrecoverable conditions.
    pub fn decode_frame(
        &mut self,
        packets: &[CodedPacket],
        counters: BurstCounters,
    ) -> Result<bool, DecodeError> {
        if self.is_fatal() {
            return Err(DecodeError::Poisoned);
        }
        if self.stopped {
            return Ok(false);
        }

        self.drain_reconfigure_requests();

        if packets.is_empty() {
            return Ok(false);
        }

        let mut asm = FrameAssembly::new(self.max_substreams);
        let outcome = self.ingest(packets, &mut asm);

        let claimed = asm.claimed_gate;
        let last_buffer = asm.last_buffer_seen;

        let produced = match outcome {
            Ok(true) => self.finish_frame(asm, counters),
            Ok(false) => false,
            Err(e) => {
                // Fatal path; never leave the gate claimed.
                if claimed {
                    self.shared.swap.release();
                }
                return Err(e);
            }
        };
        if !produced && claimed {
            self.shared.swap.release();
        }

        // Missing-frame accounting against the last observed buffer number.
        if let Some(current) = last_buffer {
            if let Some(last) = self.last_buffer_num {
                self.shared.stats.add_missing(missing_between(last, current));
            }
            self.last_buffer_num = Some(current);
        }

        Ok(produced)
    }

    /// Drain pending reconfiguration requests from the worker stages.
    fn drain_reconfigure_requests(&mut self) {
        while let Ok(req) = self.reconf_rx.try_recv() {
            self.reconfigure_if_needed(req.desc, req.force);
            if let Some(frame) = req.last_frame {
                self.requeue(frame);
            }
        }
    }

    /// Re-queue the frame that triggered a reconfiguration, stamped with
    /// the new stage snapshot.
    fn requeue(&mut self, msg: FrameMsg) {
        if let FrameMsg::Frame(mut payload) = msg {
            if payload.recv.tiles.len() != self.max_substreams {
                debug!("dropping retried frame after video-mode change");
                return;
            }
            payload.cfg = self.cfg.clone();
            if self.fec_tx.send(FrameMsg::Frame(payload)).is_err() {
                debug!("FEC queue closed while re-queueing frame");
            }
        }
    }

    /// Process every packet of the frame. `Ok(true)` means the frame is
    /// complete enough to hand to the FEC stage.
    fn ingest(&mut self, packets: &[CodedPacket], asm: &mut FrameAssembly) -> Result<bool, DecodeError> {
        for pckt in packets {
            let Some(pt) = drop_on(PayloadType::from_u8(pckt.payload_type)) else {
                return Ok(false);
            };
            asm.last_pt = Some(pt);
            asm.ssrc = pckt.ssrc;

            // Encryption configuration must match the stream.
            if pt.is_encrypted() != self.decryptor.is_some() {
                let e = if pt.is_encrypted() {
                    DecodeError::MissingDecryptionKey
                } else {
                    DecodeError::UnexpectedPlaintext
                };
                error!("{e}");
                self.shared.control.report_event("RECV error - encryption mismatch");
                return Ok(false);
            }

            // Media header.
            let media_hdr_len = pt.media_hdr_len();
            let substream;
            let buffer_num;
            let offset;
            let length;
            let mut video_hdr = None;
            if pt.has_fec() {
                let Some(h) = drop_on(FecHeader::parse(&pckt.data)) else {
                    return Ok(false);
                };
                substream = h.substream;
                buffer_num = h.buffer_num;
                offset = h.offset;
                length = h.length;
                asm.fec = FecDesc {
                    kind: pt.fec_kind(),
                    k: h.k,
                    m: h.m,
                    c: h.c,
                    seed: h.seed,
                };
            } else {
                let Some(h) = drop_on(VideoHeader::parse(&pckt.data)) else {
                    return Ok(false);
                };
                substream = h.substream;
                buffer_num = h.buffer_num;
                offset = h.offset;
                length = h.length;
                video_hdr = Some(h);
            }
            asm.last_buffer_seen = Some(buffer_num);

            // Crypto word and payload slice.
            let mut body_off = media_hdr_len;
            let mut cipher_mode = None;
            if pt.is_encrypted() {
                let word = pckt.data.get(media_hdr_len..).unwrap_or(&[]);
                let Some(mode) = drop_on(parse_crypto_word(word)) else {
                    return Ok(false);
                };
                cipher_mode = Some(mode);
                body_off += CRYPTO_HDR_LEN;
            }
            let Some(raw) = pckt.data.get(body_off..) else {
                warn!("packet shorter than its headers; dropping frame");
                return Ok(false);
            };

            // Decrypt with the media header as associated data.
            let decrypted;
            let payload: &[u8] = match cipher_mode {
                Some(mode) => {
                    let decryptor = self.decryptor.as_mut().expect("checked above");
                    match decryptor.decrypt(raw, &pckt.data[..media_hdr_len], mode) {
                        Some(plain) => {
                            decrypted = plain;
                            &decrypted
                        }
                        None => {
                            debug!("packet dropped - wrong CRC");
                            continue;
                        }
                    }
                }
                None => raw,
            };

            // Substream out of range: infer the geometry and start over.
            if substream as usize >= self.max_substreams {
                warn!(
                    "received substream ID {substream}, expecting at most {} substreams",
                    self.max_substreams
                );
                let mode = VideoMode::guess(substream + 1).map_err(|e| {
                    error!("{e}");
                    self.set_fatal();
                    e
                })?;
                warn!("guessing video mode {mode}; check if it is correct");
                self.set_video_mode(mode);
                // Invalidate the descriptor so the next packet's header
                // forces the reconfiguration with valid parameters.
                self.received_desc = None;
                *self.shared.fmt.lock().expect("format lock") = None;
                return Ok(false);
            }
            let s = substream as usize;

            // Format-change check (FEC streams carry their descriptor
            // inside the protected payload; the FEC stage re-checks there).
            if let Some(h) = &video_hdr {
                let Some(desc) = drop_on(h.desc()) else {
                    return Ok(false);
                };
                if self.check_format_change(desc) {
                    // Mid-stream change: the pipeline was flushed and
                    // reconfigured; this frame is not continued.
                    return Ok(false);
                }
                // No usable configuration (failed reconfiguration): stop
                // decoding until the format changes again.
                if self.cfg.is_none() {
                    return Ok(false);
                }
            }

            // Bookkeeping.
            asm.buffer_num[s] = buffer_num;
            asm.frame.tiles[s].data_len = length as usize;
            asm.pckt_list[s].insert(offset, payload.len() as u32);

            // Dispatch: line path writes the framebuffer, everything else
            // accumulates into the receive buffer.
            let line_cfg = self
                .cfg
                .as_ref()
                .filter(|cfg| !pt.has_fec() && matches!(cfg.kind, DecoderKind::Line(_)))
                .cloned();
            if let Some(cfg) = line_cfg {
                let DecoderKind::Line(decoders) = &cfg.kind else {
                    unreachable!("checked above");
                };
                if !asm.claimed_gate {
                    self.shared.swap.claim();
                    asm.claimed_gate = true;
                }
                let mut guard = self.shared.frame.lock().expect("frame lock");
                let Some(framebuffer) = guard.as_mut() else {
                    return Ok(false);
                };
                let tile_idx = if cfg.merged_fb { 0 } else { s };
                let (Some(tile), Some(ld)) =
                    (framebuffer.tiles.get_mut(tile_idx), decoders.get(s))
                else {
                    return Ok(false);
                };
                let dropped = ld.decode_packet(tile, offset as usize, payload);
                if dropped > 0 && self.overrun_warn.ready() {
                    error!("discarding {dropped} input bytes - frame buffer is too small");
                }
            } else if !asm.frame.tiles[s].write_at(offset as usize, payload) {
                warn!(
                    "packet at offset {offset}+{} exceeds advertised substream length {length}; \
                     packet dropped",
                    payload.len()
                );
            }
        }

        Ok(true)
    }

    /// Package the assembled frame and push it into the FEC queue.
    fn finish_frame(&mut self, asm: FrameAssembly, counters: BurstCounters) -> bool {
        let pt = match asm.last_pt {
            Some(pt) => pt,
            None => return false,
        };
        // Non-FEC paths need a working configuration by now.
        if !pt.has_fec() && self.cfg.is_none() {
            return false;
        }

        let frame_size = asm.frame.data_len();
        self.feedback.max_frame_size = self.feedback.max_frame_size.max(frame_size);
        self.feedback.decoded += 1;

        let mut recv = asm.frame;
        recv.fec = asm.fec;
        recv.ssrc = asm.ssrc;
        if let Some(desc) = self.received_desc {
            recv.color_spec = Some(desc.color_spec);
            recv.interlacing = Some(desc.interlacing);
        }

        let mut payload = FramePayload::new(
            self.cfg.clone(),
            recv,
            asm.pckt_list,
            asm.buffer_num,
            Arc::clone(&self.shared.stats),
        );
        payload.expected_pkts_cum = counters.expected_cum;
        payload.received_pkts_cum = counters.received_cum;
        let fps = self
            .display_desc
            .map(|d| d.fps)
            .or(self.received_desc.map(|d| d.fps))
            .unwrap_or(0.0);
        if fps > 0.0 {
            payload.nano_expected = (1_000_000_000.0 / fps) as u64;
        }

        let push_started = Instant::now();
        if self.fec_tx.send(FrameMsg::Frame(Box::new(payload))).is_err() {
            debug!("FEC queue closed; frame dropped");
            return false;
        }
        if fps > 0.0
            && push_started.elapsed() > Duration::from_secs_f64(1.0 / fps)
            && self.shared.stats.displayed() > 20
            && self.slow_warn.ready()
        {
            warn!("your computer may be too slow to play this");
        }
        true
    }
}
