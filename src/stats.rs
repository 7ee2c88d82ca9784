//! Per-frame statistics and cumulative counters.
//!
//! Every frame leaving the pipeline contributes one [`FrameReport`]; the
//! hub folds it into the cumulative counters, emits one `RECV …` record on
//! the control channel and logs a human summary every 600 frames.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::info;

use crate::control::ControlSink;
use crate::header::BUFFER_NUM_MODULO;

/// Frames between human-readable summary lines.
const SUMMARY_INTERVAL: u64 = 600;

// ── Counters ─────────────────────────────────────────────────────

/// Cumulative receive statistics, reported through the control socket and
/// queryable as a snapshot.
#[derive(Debug, Default, Clone, Serialize)]
pub struct StatsSnapshot {
    pub displayed: u64,
    pub dropped: u64,
    pub corrupted: u64,
    pub missing: u64,
    pub fec_ok: u64,
    pub fec_corrected: u64,
    pub fec_nok: u64,
    pub received_bytes: u64,
    pub expected_bytes: u64,
    pub nano_per_frame_decompress: u64,
    pub nano_per_frame_error_correction: u64,
    pub nano_per_frame_expected: u64,
    pub reported_frames: u64,
}

impl StatsSnapshot {
    fn summary(&self) -> String {
        let mut line = format!(
            "video decode stats (cumulative): {} total / {} disp / {} drop / {} corr / {} missing",
            self.displayed + self.dropped + self.missing,
            self.displayed,
            self.dropped,
            self.corrupted,
            self.missing,
        );
        if self.fec_ok + self.fec_corrected + self.fec_nok > 0 {
            line.push_str(&format!(
                " FEC noerr/OK/NOK: {}/{}/{}",
                self.fec_ok, self.fec_corrected, self.fec_nok
            ));
        }
        line
    }
}

// ── FrameReport ──────────────────────────────────────────────────

/// What one frame contributes when it leaves the pipeline.
#[derive(Debug)]
pub struct FrameReport {
    /// Wire buffer number of the first substream.
    pub buffer_id: u32,
    pub expected_pkts_cum: u64,
    pub received_pkts_cum: u64,
    pub expected_bytes: u64,
    pub received_bytes: u64,
    pub has_fec: bool,
    pub is_corrupted: bool,
    pub is_displayed: bool,
    pub nano_decompress: u64,
    pub nano_error_correction: u64,
    pub nano_expected: u64,
}

// ── StatsHub ─────────────────────────────────────────────────────

/// Shared statistics state, locked briefly by the ingress stage and by the
/// frame-message destructor.
pub(crate) struct StatsHub {
    inner: Mutex<StatsSnapshot>,
    control: Arc<dyn ControlSink>,
}

impl StatsHub {
    pub fn new(control: Arc<dyn ControlSink>) -> Self {
        StatsHub {
            inner: Mutex::new(StatsSnapshot::default()),
            control,
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.lock().expect("stats lock").clone()
    }

    /// Frames displayed so far (gates the slow-pipeline warning).
    pub fn displayed(&self) -> u64 {
        self.inner.lock().expect("stats lock").displayed
    }

    pub fn add_missing(&self, n: u64) {
        self.inner.lock().expect("stats lock").missing += n;
    }

    /// Fold a finished frame into the counters and emit its record.
    pub fn report_frame(&self, report: &FrameReport) {
        let record;
        let summary;
        {
            let mut s = self.inner.lock().expect("stats lock");
            if report.has_fec {
                if report.is_corrupted {
                    s.fec_nok += 1;
                } else if report.received_bytes == report.expected_bytes {
                    s.fec_ok += 1;
                } else {
                    s.fec_corrected += 1;
                }
            }
            s.expected_bytes += report.expected_bytes;
            s.received_bytes += report.received_bytes;
            s.corrupted += report.is_corrupted as u64;
            if report.is_displayed {
                s.displayed += 1;
            } else {
                s.dropped += 1;
            }
            s.nano_per_frame_decompress += report.nano_decompress;
            s.nano_per_frame_error_correction += report.nano_error_correction;
            s.nano_per_frame_expected += report.nano_expected;
            s.reported_frames += 1;

            record = format!(
                "RECV bufferId={} expectedPackets={} receivedPackets={} \
                 expectedBytes={} receivedBytes={} isCorrupted={} isDisplayed={} \
                 timestamp={} nanoPerFrameDecompress={} nanoPerFrameErrorCorrection={} \
                 nanoPerFrameExpected={} reportedFrames={}",
                report.buffer_id,
                report.expected_pkts_cum,
                report.received_pkts_cum,
                s.expected_bytes,
                s.received_bytes,
                s.corrupted,
                s.displayed,
                epoch_millis(),
                s.nano_per_frame_decompress,
                s.nano_per_frame_error_correction,
                s.nano_per_frame_expected,
                s.reported_frames,
            );
            summary = ((s.displayed + s.dropped + s.missing) % SUMMARY_INTERVAL
                == SUMMARY_INTERVAL - 1)
                .then(|| s.summary());
        }
        if let Some(line) = summary {
            info!("{line}");
        }
        self.control.report_stats(&record);
    }

    /// Log the final summary (decoder teardown).
    pub fn log_summary(&self) {
        info!("{}", self.inner.lock().expect("stats lock").summary());
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Missing-frame accounting ─────────────────────────────────────

/// Frames missing between consecutively observed buffer numbers.
///
/// The buffer number wraps at 2^22. A forward gap below half the modulus
/// counts as that many lost frames; anything larger is treated as
/// reordering and counts as one.
pub(crate) fn missing_between(last: u32, current: u32) -> u64 {
    let diff = current
        .wrapping_sub(last.wrapping_add(1))
        & (BUFFER_NUM_MODULO - 1);
    if diff < BUFFER_NUM_MODULO / 2 {
        diff as u64
    } else {
        1
    }
}

// ── Tests ────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::NullControl;

    fn report(displayed: bool) -> FrameReport {
        FrameReport {
            buffer_id: 1,
            expected_pkts_cum: 10,
            received_pkts_cum: 10,
            expected_bytes: 1000,
            received_bytes: 1000,
            has_fec: false,
            is_corrupted: false,
            is_displayed: displayed,
            nano_decompress: 5,
            nano_error_correction: 3,
            nano_expected: 40_000_000,
        }
    }

    #[test]
    fn missing_frame_accounting() {
        // Consecutive buffers, gaps, reordering, wrap.
        assert_eq!(missing_between(5, 6), 0);
        assert_eq!(missing_between(5, 10), 4);
        assert_eq!(missing_between(0, 100), 99);
        assert_eq!(missing_between(10, 9), 1);
        assert_eq!(missing_between(10, 2), 1);
        assert_eq!(missing_between(BUFFER_NUM_MODULO - 1, 0), 0);
        assert_eq!(missing_between(BUFFER_NUM_MODULO - 1, 2), 2);
    }

    #[test]
    fn displayed_dropped_and_fec_outcomes() {
        let hub = StatsHub::new(Arc::new(NullControl));
        hub.report_frame(&report(true));
        hub.report_frame(&report(false));

        let mut ok = report(true);
        ok.has_fec = true;
        hub.report_frame(&ok);

        let mut corrected = report(true);
        corrected.has_fec = true;
        corrected.received_bytes = 800;
        hub.report_frame(&corrected);

        let mut nok = report(false);
        nok.has_fec = true;
        nok.is_corrupted = true;
        hub.report_frame(&nok);

        let s = hub.snapshot();
        assert_eq!(s.displayed, 3);
        assert_eq!(s.dropped, 2);
        assert_eq!(s.reported_frames, 5);
        assert_eq!((s.fec_ok, s.fec_corrected, s.fec_nok), (1, 1, 1));
        assert_eq!(s.corrupted, 1);
    }

    #[test]
    fn record_carries_cumulative_values() {
        struct Capture(Mutex<Vec<String>>);
        impl ControlSink for Capture {
            fn report_stats(&self, record: &str) {
                self.0.lock().unwrap().push(record.to_string());
            }
        }

        let sink = Arc::new(Capture(Mutex::new(Vec::new())));
        let hub = StatsHub::new(sink.clone());
        hub.report_frame(&report(true));
        hub.report_frame(&report(true));

        let records = sink.0.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].starts_with("RECV bufferId=1"));
        assert!(records[0].contains("expectedBytes=1000"));
        assert!(records[1].contains("expectedBytes=2000"));
        assert!(records[1].contains("reportedFrames=2"));
        for key in ["expectedPackets=", "isDisplayed=", "timestamp=", "nanoPerFrameExpected="] {
            assert!(records[0].contains(key), "missing {key}");
        }
    }
}
