//! Pipeline orchestration: shared state between the three stages, the
//! framebuffer-swap gate, per-reconfiguration stage snapshots, and worker
//! thread lifecycle (see the crate docs for the stage diagram).
//!
//! The two frame queues have capacity one; an enqueue blocks until the
//! consumer pops, which is the only backpressure mechanism between stages.
//! Shutdown travels as a poison message that the FEC worker forwards before
//! exiting, so both workers wake and exit in order.

pub(crate) mod fec_stage;
pub(crate) mod ingress;
pub(crate) mod present;
pub(crate) mod reconfigure;

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::codecs::Codecs;
use crate::control::ControlSink;
use crate::decoder::DropPolicy;
use crate::decompress::Decompressor;
use crate::desc::{ColorSpec, VideoDesc, VideoMode};
use crate::display::{Display, DisplayFrame, FrameTile, RgbShift};
use crate::msg::{FrameMsg, ReconfigureRequest};
use crate::stats::StatsHub;
use crate::transform::{ChangeIlFn, IlState, LineDecodeFn};

// ── SwapGate ─────────────────────────────────────────────────────

/// Double-buffering gate between the writer stages and the present stage.
///
/// `claim` blocks until the present stage has handed the previous frame to
/// the display and acquired a fresh framebuffer, then reserves the buffer
/// for writing. `release` re-opens the gate.
pub(crate) struct SwapGate {
    swapped: Mutex<bool>,
    cv: Condvar,
}

impl SwapGate {
    pub fn new() -> Self {
        SwapGate {
            swapped: Mutex::new(true),
            cv: Condvar::new(),
        }
    }

    pub fn claim(&self) {
        let mut swapped = self.swapped.lock().expect("swap gate lock");
        while !*swapped {
            swapped = self.cv.wait(swapped).expect("swap gate wait");
        }
        *swapped = false;
    }

    pub fn release(&self) {
        let mut swapped = self.swapped.lock().expect("swap gate lock");
        *swapped = true;
        drop(swapped);
        self.cv.notify_one();
    }
}

// ── LineDecoder ──────────────────────────────────────────────────

/// Per-substream state of the line-decoded (uncompressed) path.
pub(crate) struct LineDecoder {
    /// Byte offset of this substream's top-left corner in the framebuffer.
    /// Nonzero when multiple tiles share a merged framebuffer.
    pub base_offset: usize,
    /// Source and destination bytes per pixel (fractional for packed
    /// formats).
    pub src_bpp: f64,
    pub dst_bpp: f64,
    pub shift: RgbShift,
    pub decode_line: LineDecodeFn,
    pub src_linesize: usize,
    pub dst_linesize: usize,
    /// Framebuffer pitch; can exceed `dst_linesize`.
    pub dst_pitch: usize,
}

impl LineDecoder {
    /// Decode one packet's payload starting at source byte `data_pos`.
    ///
    /// A packet may span several lines; each line is clipped to the
    /// destination linesize. Returns the number of payload bytes dropped
    /// because the framebuffer was too small (0 in the normal case).
    pub fn decode_packet(&self, tile: &mut FrameTile, data_pos: usize, payload: &[u8]) -> usize {
        let limit = tile.data_len.min(tile.data.len());

        // Y position in the source, converted to a destination byte offset.
        let mut y = data_pos / self.src_linesize * self.dst_pitch;
        // X position within the source line, and its destination equivalent.
        let mut s_x = data_pos % self.src_linesize;
        let mut d_x = ((s_x as f64 / self.src_bpp) as usize as f64 * self.dst_bpp) as usize;

        let mut src = payload;
        while !src.is_empty() {
            // Destination bytes this chunk expands to, clipped to the line.
            let mut l = ((src.len() as f64 / self.src_bpp) as usize as f64 * self.dst_bpp) as usize;
            if l + d_x > self.dst_linesize {
                l = self.dst_linesize.saturating_sub(d_x);
            }
            let dst_off = self.base_offset + y + d_x;
            if dst_off + l > limit {
                return src.len();
            }
            (self.decode_line)(&mut tile.data[dst_off..dst_off + l], src, self.shift);

            // One line (or the tail of one) consumed from the source.
            let consumed = (self.src_linesize - s_x).min(src.len());
            src = &src[consumed..];
            d_x = 0;
            s_x = 0;
            y += self.dst_pitch;
        }
        0
    }

    /// Decode a whole reconstructed substream buffer line by line
    /// (FEC-recovered uncompressed payloads).
    pub fn decode_buffer(&self, tile: &mut FrameTile, src: &[u8]) {
        let limit = tile.data_len.min(tile.data.len());
        let mut src_pos = 0;
        let mut dst_off = self.base_offset;
        while src_pos < src.len() {
            let chunk_end = (src_pos + self.src_linesize).min(src.len());
            if dst_off + self.dst_linesize > limit {
                break;
            }
            (self.decode_line)(
                &mut tile.data[dst_off..dst_off + self.dst_linesize],
                &src[src_pos..chunk_end],
                self.shift,
            );
            src_pos += self.src_linesize;
            dst_off += self.dst_pitch;
        }
    }
}

// ── Stage configuration ──────────────────────────────────────────

/// How incoming data turns into pixels after the current reconfiguration.
pub(crate) enum DecoderKind {
    /// Uncompressed stream; per-substream line transforms write straight
    /// into the display framebuffer.
    Line(Arc<[LineDecoder]>),
    /// Opaque stream fed to external decompressors.
    External { accepts_corrupted: bool },
}

/// Immutable snapshot of the decoder configuration, rebuilt on every
/// reconfiguration and stamped onto each frame message so the worker
/// stages always see a consistent view.
pub(crate) struct StageConfig {
    pub desc: VideoDesc,
    pub video_mode: VideoMode,
    pub max_substreams: usize,
    pub kind: DecoderKind,
    pub out_codec: ColorSpec,
    pub pitch: usize,
    /// Whether all tiles share one large framebuffer.
    pub merged_fb: bool,
    pub change_il: Option<ChangeIlFn>,
    pub drop_policy: DropPolicy,
}

// ── Shared state ─────────────────────────────────────────────────

/// State owned jointly by the three stages.
pub(crate) struct Shared {
    pub display: Arc<dyn Display>,
    pub codecs: Arc<Codecs>,
    pub control: Arc<dyn ControlSink>,
    pub stats: Arc<StatsHub>,
    /// The writable framebuffer currently held by the pipeline.
    pub frame: Mutex<Option<DisplayFrame>>,
    pub swap: SwapGate,
    /// Received stream descriptor, readable from any thread.
    pub fmt: Mutex<Option<VideoDesc>>,
    /// Display's native codecs; blacklisting replaces entries with `None`.
    pub natives: Mutex<Vec<Option<ColorSpec>>>,
    /// Currently selected output codec, cleared by blacklisting.
    pub current_out: Mutex<Option<ColorSpec>>,
    /// Decompressor instances and interlacing scratch, rebuilt on
    /// reconfiguration.
    pub present: Mutex<PresentState>,
    /// Set when an unrecoverable error (FEC engine init) poisons the
    /// pipeline.
    pub fatal: AtomicBool,
}

/// Present-stage resources surviving across frames.
#[derive(Default)]
pub(crate) struct PresentState {
    pub decompressors: Vec<Box<dyn Decompressor>>,
    /// Per-substream scratch for parallel decompression into a merged
    /// framebuffer.
    pub scratch: Vec<Vec<u8>>,
    pub il_state: Vec<IlState>,
}

impl PresentState {
    pub fn clear(&mut self) {
        self.decompressors.clear();
        self.scratch.clear();
        self.il_state.clear();
    }
}

// ── Worker lifecycle ─────────────────────────────────────────────

pub(crate) struct Workers {
    fec: JoinHandle<()>,
    present: JoinHandle<()>,
}

impl Workers {
    pub fn join(self) {
        let _ = self.fec.join();
        let _ = self.present.join();
    }
}

/// Spawn the FEC and decompress workers.
pub(crate) fn start_workers(
    shared: &Arc<Shared>,
    fec_rx: Receiver<FrameMsg>,
    dec_tx: Sender<FrameMsg>,
    dec_rx: Receiver<FrameMsg>,
    reconf_tx: Sender<ReconfigureRequest>,
) -> Workers {
    let fec = {
        let shared = Arc::clone(shared);
        let reconf_tx = reconf_tx.clone();
        thread::Builder::new()
            .name("vidrx-fec".into())
            .spawn(move || fec_stage::run(&shared, &fec_rx, &dec_tx, &reconf_tx))
            .expect("spawn FEC worker")
    };
    let present = {
        let shared = Arc::clone(shared);
        thread::Builder::new()
            .name("vidrx-decompress".into())
            .spawn(move || present::run(&shared, &dec_rx, &reconf_tx))
            .expect("spawn decompress worker")
    };
    Workers { fec, present }
}

// ── Tests ────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn swap_gate_starts_open_and_blocks_until_release() {
        let gate = Arc::new(SwapGate::new());
        gate.claim(); // must not block

        let g = Arc::clone(&gate);
        let waiter = thread::spawn(move || g.claim());
        thread::sleep(Duration::from_millis(30));
        assert!(!waiter.is_finished());

        gate.release();
        waiter.join().unwrap();
    }

    fn test_tile(len: usize) -> FrameTile {
        FrameTile {
            width: 0,
            height: 0,
            data: vec![0u8; len],
            data_len: len,
        }
    }

    fn plain_decoder(linesize: usize, pitch: usize) -> LineDecoder {
        LineDecoder {
            base_offset: 0,
            src_bpp: 2.0,
            dst_bpp: 2.0,
            shift: RgbShift::default(),
            decode_line: crate::transform::copy_line,
            src_linesize: linesize,
            dst_linesize: linesize,
            dst_pitch: pitch,
        }
    }

    #[test]
    fn packet_spanning_lines_is_split() {
        // 4 lines of 8 bytes, pitch == linesize; one packet covering the
        // middle two lines, starting mid-line.
        let ld = plain_decoder(8, 8);
        let mut tile = test_tile(32);
        let payload: Vec<u8> = (1..=16).collect();
        assert_eq!(ld.decode_packet(&mut tile, 4, &payload), 0);
        assert_eq!(&tile.data[4..20], &payload[..]);
        assert_eq!(&tile.data[..4], &[0; 4]);

        // Pitch above the linesize leaves the row padding untouched.
        let ld = plain_decoder(4, 8);
        let mut tile = test_tile(32);
        assert_eq!(ld.decode_packet(&mut tile, 0, &[0xAA; 8]), 0);
        assert_eq!(&tile.data[0..4], &[0xAA; 4]);
        assert_eq!(&tile.data[4..8], &[0; 4]);
        assert_eq!(&tile.data[8..12], &[0xAA; 4]);
    }

    #[test]
    fn overrun_drops_remaining_bytes() {
        let ld = plain_decoder(8, 8);
        let mut tile = test_tile(8); // room for one line only
        assert_eq!(ld.decode_packet(&mut tile, 0, &[1u8; 16]), 8);
        assert_eq!(&tile.data[..8], &[1u8; 8]);
    }

    #[test]
    fn decode_buffer_walks_whole_tile() {
        let ld = plain_decoder(4, 4);
        let mut tile = test_tile(16);
        let src: Vec<u8> = (0..16).collect();
        ld.decode_buffer(&mut tile, &src);
        assert_eq!(tile.data, src);
    }
}
