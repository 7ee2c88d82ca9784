//! Messages traveling between the pipeline stages.
//!
//! A [`FrameMsg`] carries one frame from ingress through the FEC stage to
//! the present stage. Dropping its payload, wherever that happens, emits
//! the frame's statistics record, so drops and displays are accounted for
//! uniformly.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::desc::VideoDesc;
use crate::frame::VideoFrame;
use crate::pipeline::StageConfig;
use crate::stats::{FrameReport, StatsHub};

// ── Post-FEC tile views ──────────────────────────────────────────

/// Where a post-FEC tile's bytes live.
#[derive(Debug, Clone, Copy)]
pub(crate) enum NofecSource {
    /// Alias into the received frame's tile buffer.
    Recv,
    /// Alias into a FEC-recovered buffer owned by the message.
    FecOut,
}

/// One tile of the "no-FEC" frame: a view into buffers owned by the
/// enclosing message, valid only for the message's lifetime.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NofecTile {
    pub source: NofecSource,
    pub offset: usize,
    pub len: usize,
}

// ── FrameMsg ─────────────────────────────────────────────────────

/// The unit traveling through the stage queues.
pub(crate) enum FrameMsg {
    /// Shutdown marker; forwarded by the FEC stage, terminal at the
    /// present stage.
    Poison,
    Frame(Box<FramePayload>),
}

/// One received frame and its bookkeeping.
pub(crate) struct FramePayload {
    /// Stage snapshot current when the message was (re)queued. `None` only
    /// before the first reconfiguration, for FEC streams whose descriptor
    /// is still unknown.
    pub cfg: Option<Arc<StageConfig>>,
    /// Raw received frame (possibly FEC-encoded / compressed).
    pub recv: VideoFrame,
    /// Post-FEC tile views, filled by the FEC stage.
    pub nofec: Vec<NofecTile>,
    /// FEC-recovered substream buffers backing [`NofecSource::FecOut`].
    pub fec_out: Vec<Vec<u8>>,
    /// Per-substream `offset → length` of received payload; the
    /// authoritative received-byte accounting.
    pub pckt_list: Vec<BTreeMap<u32, u32>>,
    /// Per-substream wire buffer numbers.
    pub buffer_num: Vec<u32>,
    pub expected_pkts_cum: u64,
    pub received_pkts_cum: u64,
    pub nano_decompress: u64,
    pub nano_error_correction: u64,
    pub nano_expected: u64,
    pub is_displayed: bool,
    pub is_corrupted: bool,
    stats: Arc<StatsHub>,
}

impl FramePayload {
    pub fn new(
        cfg: Option<Arc<StageConfig>>,
        recv: VideoFrame,
        pckt_list: Vec<BTreeMap<u32, u32>>,
        buffer_num: Vec<u32>,
        stats: Arc<StatsHub>,
    ) -> Self {
        let tiles = recv.tiles.len();
        FramePayload {
            cfg,
            recv,
            nofec: Vec::with_capacity(tiles),
            fec_out: Vec::new(),
            pckt_list,
            buffer_num,
            expected_pkts_cum: 0,
            received_pkts_cum: 0,
            nano_decompress: 0,
            nano_error_correction: 0,
            nano_expected: 0,
            is_displayed: false,
            is_corrupted: false,
            stats,
        }
    }

    /// Bytes actually received for substream `i`.
    pub fn received_bytes(&self, i: usize) -> u64 {
        self.pckt_list
            .get(i)
            .map(|m| m.values().map(|&len| len as u64).sum())
            .unwrap_or(0)
    }

    /// Resolve the post-FEC bytes of tile `i`, if any.
    pub fn tile_bytes(&self, i: usize) -> Option<&[u8]> {
        let view = self.nofec.get(i)?;
        let backing: &[u8] = match view.source {
            NofecSource::Recv => self.recv.tiles.get(i)?.data.as_deref()?,
            NofecSource::FecOut => self.fec_out.get(i)?,
        };
        backing.get(view.offset..view.offset + view.len)
    }
}

impl Drop for FramePayload {
    fn drop(&mut self) {
        let received_bytes: u64 = (0..self.recv.tiles.len())
            .map(|i| self.received_bytes(i))
            .sum();
        self.stats.report_frame(&FrameReport {
            buffer_id: self.buffer_num.first().copied().unwrap_or(0),
            expected_pkts_cum: self.expected_pkts_cum,
            received_pkts_cum: self.received_pkts_cum,
            expected_bytes: self.recv.data_len() as u64,
            received_bytes,
            has_fec: self.recv.fec.kind.is_some(),
            is_corrupted: self.is_corrupted,
            is_displayed: self.is_displayed,
            nano_decompress: self.nano_decompress,
            nano_error_correction: self.nano_error_correction,
            nano_expected: self.nano_expected,
        });
    }
}

// ── ReconfigureRequest ───────────────────────────────────────────

/// Request to re-run decoder reconfiguration, drained at the top of each
/// ingress call.
pub(crate) struct ReconfigureRequest {
    pub desc: VideoDesc,
    /// The frame that triggered the change, re-queued once after the
    /// pipeline restarts.
    pub last_frame: Option<FrameMsg>,
    pub force: bool,
}

// ── Tests ────────────────────────────────────────────────────────
