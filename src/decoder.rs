//! Decoder lifecycle and public API.
//!
//! A [`VideoDecoder`] owns the display handle, both worker threads and the
//! stage queues. The caller's receive thread drives it through
//! [`decode_frame`](VideoDecoder::decode_frame), one reassembled frame per
//! call.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codecs::Codecs;
use crate::control::{ControlSink, NullControl};
use crate::decrypt::Decryptor;
use crate::desc::{Interlacing, VideoDesc, VideoMode};
use crate::display::{Display, PutPolicy};
use crate::error::DecodeError;
use crate::msg::{FrameMsg, ReconfigureRequest};
use crate::pipeline::{self, PresentState, Shared, StageConfig, SwapGate, Workers};
use crate::stats::{StatsHub, StatsSnapshot};
use crate::util::ThrottledLog;

// ── Options ──────────────────────────────────────────────────────

/// Behavior of `put_frame` under display backpressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DropPolicy {
    /// Drop frames the display cannot take (default).
    #[default]
    Nonblock,
    /// Apply backpressure upstream instead of dropping.
    Blocking,
}

impl FromStr for DropPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nonblock" => Ok(DropPolicy::Nonblock),
            "blocking" => Ok(DropPolicy::Blocking),
            other => Err(format!("wrong drop policy {other:?}")),
        }
    }
}

/// Runtime options of the decoder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecoderOptions {
    pub drop_policy: DropPolicy,
}

impl DecoderOptions {
    pub fn with_drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }
}

// ── Ingress inputs & outputs ─────────────────────────────────────

/// One reassembled payload packet as delivered by the RTP reassembler.
#[derive(Debug, Clone)]
pub struct CodedPacket {
    pub payload_type: u8,
    pub ssrc: u32,
    /// Media header(s) followed by the payload.
    pub data: Vec<u8>,
}

/// Cumulative packet counters maintained by the reassembler, echoed into
/// the per-frame stat record.
#[derive(Debug, Clone, Copy, Default)]
pub struct BurstCounters {
    pub expected_cum: u64,
    pub received_cum: u64,
}

/// Feedback for the receiver subsystem.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IngressFeedback {
    /// Largest frame observed, in bytes.
    pub max_frame_size: usize,
    /// Number of frames that entered the pipeline.
    pub decoded: u64,
}

// ── Builder ──────────────────────────────────────────────────────

/// Builder for [`VideoDecoder`].
pub struct VideoDecoderBuilder {
    display: Arc<dyn Display>,
    video_mode: VideoMode,
    codecs: Arc<Codecs>,
    decryptor: Option<Box<dyn Decryptor>>,
    options: DecoderOptions,
    control: Arc<dyn ControlSink>,
    on_format_change: Option<Box<dyn Fn(&VideoDesc) + Send>>,
}

impl VideoDecoderBuilder {
    /// Capability object used for codec decisions.
    pub fn codecs(mut self, codecs: Codecs) -> Self {
        self.codecs = Arc::new(codecs);
        self
    }

    /// Enable encrypted payload types.
    pub fn decryptor(mut self, decryptor: Box<dyn Decryptor>) -> Self {
        self.decryptor = Some(decryptor);
        self
    }

    pub fn options(mut self, options: DecoderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn control(mut self, control: Arc<dyn ControlSink>) -> Self {
        self.control = control;
        self
    }

    /// Callback invoked after the stream descriptor changes (the
    /// receiver-subsystem notification).
    pub fn on_format_change(mut self, f: impl Fn(&VideoDesc) + Send + 'static) -> Self {
        self.on_format_change = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Result<VideoDecoder, DecodeError> {
        let natives: Vec<_> = self.display.codecs().into_iter().map(Some).collect();
        if natives.is_empty() {
            warn!("display advertises no native codecs; decoding will fail");
        }
        let supported_il = self.display.supported_il_modes();
        let stats = Arc::new(StatsHub::new(Arc::clone(&self.control)));

        let shared = Arc::new(Shared {
            display: self.display,
            codecs: self.codecs,
            control: self.control,
            stats,
            frame: Mutex::new(None),
            swap: SwapGate::new(),
            fmt: Mutex::new(None),
            natives: Mutex::new(natives),
            current_out: Mutex::new(None),
            present: Mutex::new(PresentState::default()),
            fatal: AtomicBool::new(false),
        });

        let (fec_tx, fec_rx) = bounded(1);
        let (dec_tx, dec_rx) = bounded(1);
        let (reconf_tx, reconf_rx) = unbounded();

        let mut decoder = VideoDecoder {
            shared,
            options: self.options,
            video_mode: self.video_mode,
            max_substreams: self.video_mode.tile_count(),
            supported_il,
            received_desc: None,
            display_desc: None,
            cfg: None,
            decryptor: self.decryptor,
            workers: None,
            fec_tx,
            fec_rx,
            dec_tx,
            dec_rx,
            reconf_tx,
            reconf_rx,
            last_buffer_num: None,
            slow_warn: ThrottledLog::new(Duration::from_secs(5)),
            overrun_warn: ThrottledLog::new(Duration::from_secs(5)),
            feedback: IngressFeedback::default(),
            on_format_change: self.on_format_change,
            fatal: false,
            stopped: false,
        };
        decoder.start_workers();
        Ok(decoder)
    }
}

// ── VideoDecoder ─────────────────────────────────────────────────

/// The receive-side decoding pipeline.
///
/// Workers are alive exactly while the decoder is running;
/// [`stop`](VideoDecoder::stop) (or drop) poisons the FEC queue, joins
/// both threads and discards the held framebuffer.
pub struct VideoDecoder {
    pub(crate) shared: Arc<Shared>,
    pub(crate) options: DecoderOptions,
    pub(crate) video_mode: VideoMode,
    pub(crate) max_substreams: usize,
    pub(crate) supported_il: Vec<Interlacing>,
    /// Description of the network video (authoritative copy; the shared
    /// one mirrors it for cross-thread reads).
    pub(crate) received_desc: Option<VideoDesc>,
    /// Description the display is currently configured to.
    pub(crate) display_desc: Option<VideoDesc>,
    pub(crate) cfg: Option<Arc<StageConfig>>,
    pub(crate) decryptor: Option<Box<dyn Decryptor>>,
    pub(crate) workers: Option<Workers>,
    pub(crate) fec_tx: Sender<FrameMsg>,
    pub(crate) fec_rx: Receiver<FrameMsg>,
    pub(crate) dec_tx: Sender<FrameMsg>,
    pub(crate) dec_rx: Receiver<FrameMsg>,
    pub(crate) reconf_tx: Sender<ReconfigureRequest>,
    pub(crate) reconf_rx: Receiver<ReconfigureRequest>,
    pub(crate) last_buffer_num: Option<u32>,
    pub(crate) slow_warn: ThrottledLog,
    pub(crate) overrun_warn: ThrottledLog,
    pub(crate) feedback: IngressFeedback,
    pub(crate) on_format_change: Option<Box<dyn Fn(&VideoDesc) + Send>>,
    pub(crate) fatal: bool,
    pub(crate) stopped: bool,
}

impl VideoDecoder {
    /// Start building a decoder for the given display and expected video
    /// mode.
    pub fn builder(display: Arc<dyn Display>, video_mode: VideoMode) -> VideoDecoderBuilder {
        VideoDecoderBuilder {
            display,
            video_mode,
            codecs: Arc::new(Codecs::default()),
            decryptor: None,
            options: DecoderOptions::default(),
            control: Arc::new(NullControl),
            on_format_change: None,
        }
    }

    /// Current received stream descriptor (the `get_format` query).
    pub fn format(&self) -> Option<VideoDesc> {
        *self.shared.fmt.lock().expect("format lock")
    }

    /// Snapshot of the cumulative statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Feedback counters for the receiver subsystem.
    pub fn feedback(&self) -> IngressFeedback {
        self.feedback
    }

    /// Video mode the decoder currently assumes.
    pub fn video_mode(&self) -> VideoMode {
        self.video_mode
    }

    /// Tear the pipeline down: poison the queues, join both workers,
    /// discard the held framebuffer and log the final summary.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.stop_workers();
        self.shared.control.report_event("RECV stream ended");
        if let Some(frame) = self.shared.frame.lock().expect("frame lock").take() {
            self.shared.display.put_frame(frame, PutPolicy::Discard);
        }
        self.shared.stats.log_summary();
    }

    // ── Internal ─────────────────────────────────────────────────

    pub(crate) fn start_workers(&mut self) {
        self.workers = Some(pipeline::start_workers(
            &self.shared,
            self.fec_rx.clone(),
            self.dec_tx.clone(),
            self.dec_rx.clone(),
            self.reconf_tx.clone(),
        ));
    }

    /// Push a poison message and join both workers, flushing any
    /// pipelined frames.
    pub(crate) fn stop_workers(&mut self) {
        if let Some(workers) = self.workers.take() {
            if self.fec_tx.send(FrameMsg::Poison).is_err() {
                debug!("FEC queue closed before poison");
            }
            workers.join();
        }
    }

    pub(crate) fn set_fatal(&mut self) {
        self.fatal = true;
        self.shared.fatal.store(true, Ordering::Relaxed);
    }

    pub(crate) fn is_fatal(&self) -> bool {
        self.fatal || self.shared.fatal.load(Ordering::Relaxed)
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        self.stop();
    }
}

