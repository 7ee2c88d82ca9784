//! Shared test doubles and wire-format helpers for the pipeline tests:
//! a capturing display, scriptable decompressors, a deterministic mock FEC
//! scheme, an XOR test cipher, and packetizers that fragment frames the
//! way the sender does.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use vidrx::decompress::{DecompressStatus, Decompressor, DecompressorFactory};
use vidrx::decrypt::{CipherMode, Decryptor};
use vidrx::desc::{ColorSpec, Interlacing, VideoDesc, VideoMode};
use vidrx::display::{
    Display, DisplayFrame, FrameTile, FramebufferLayout, PutPolicy, PutResult, RgbShift,
};
use vidrx::error::DecodeError;
use vidrx::fec::{FecDesc, FecEngine, FecFactory, FecKind};
use vidrx::header::{FecHeader, PayloadType, VideoHeader};
use vidrx::{CodedPacket, ControlSink};

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn desc(width: u32, height: u32, codec: ColorSpec) -> VideoDesc {
    VideoDesc {
        width,
        height,
        fps: 25.0,
        interlacing: Interlacing::Progressive,
        color_spec: codec,
        tile_count: 1,
    }
}

// ── Capturing control sink ───────────────────────────────────────

#[derive(Default)]
pub struct CapturingControl {
    pub events: Mutex<Vec<String>>,
    pub records: Mutex<Vec<String>>,
}

impl ControlSink for CapturingControl {
    fn report_stats(&self, record: &str) {
        self.records.lock().unwrap().push(record.to_string());
    }

    fn report_event(&self, event: &str) {
        self.events.lock().unwrap().push(event.to_string());
    }
}

// ── TestDisplay ──────────────────────────────────────────────────

#[derive(Default)]
struct DisplayState {
    config: Option<(VideoDesc, VideoMode)>,
    reconfigure_calls: u32,
    displayed: Vec<DisplayFrame>,
    dropped: u32,
    discarded: u32,
    stalled: bool,
}

/// A display sink that records everything submitted to it and can
/// simulate backpressure.
pub struct TestDisplay {
    natives: Vec<ColorSpec>,
    layout: FramebufferLayout,
    fixed_pitch: Option<usize>,
    state: Mutex<DisplayState>,
    cv: Condvar,
}

impl TestDisplay {
    pub fn new(natives: Vec<ColorSpec>) -> Arc<Self> {
        Arc::new(TestDisplay {
            natives,
            layout: FramebufferLayout::Merged,
            fixed_pitch: None,
            state: Mutex::new(DisplayState::default()),
            cv: Condvar::new(),
        })
    }

    pub fn with_layout(natives: Vec<ColorSpec>, layout: FramebufferLayout) -> Arc<Self> {
        Arc::new(TestDisplay {
            natives,
            layout,
            fixed_pitch: None,
            state: Mutex::new(DisplayState::default()),
            cv: Condvar::new(),
        })
    }

    pub fn stall(&self, stalled: bool) {
        self.state.lock().unwrap().stalled = stalled;
        self.cv.notify_all();
    }

    pub fn displayed_count(&self) -> usize {
        self.state.lock().unwrap().displayed.len()
    }

    pub fn displayed_frames(&self) -> Vec<DisplayFrame> {
        self.state.lock().unwrap().displayed.clone()
    }

    pub fn dropped_count(&self) -> u32 {
        self.state.lock().unwrap().dropped
    }

    pub fn reconfigure_count(&self) -> u32 {
        self.state.lock().unwrap().reconfigure_calls
    }

    pub fn current_config(&self) -> Option<(VideoDesc, VideoMode)> {
        self.state.lock().unwrap().config
    }

    fn frame_for(&self, desc: &VideoDesc) -> DisplayFrame {
        let tiles = match self.layout {
            FramebufferLayout::Merged => {
                let pitch = self
                    .fixed_pitch
                    .unwrap_or_else(|| desc.color_spec.linesize(desc.width as usize));
                let size = pitch * desc.height as usize;
                vec![FrameTile {
                    width: desc.width,
                    height: desc.height,
                    data: vec![0u8; size],
                    data_len: size,
                }]
            }
            FramebufferLayout::SeparateTiles => {
                let linesize = desc.color_spec.linesize(desc.width as usize);
                let size = linesize * desc.height as usize;
                (0..desc.tile_count.max(1))
                    .map(|_| FrameTile {
                        width: desc.width,
                        height: desc.height,
                        data: vec![0u8; size],
                        data_len: size,
                    })
                    .collect()
            }
        };
        DisplayFrame {
            tiles,
            color_spec: desc.color_spec,
            interlacing: desc.interlacing,
            ssrc: 0,
            decoder_overrides_data_len: false,
        }
    }
}

impl Display for TestDisplay {
    fn codecs(&self) -> Vec<ColorSpec> {
        self.natives.clone()
    }

    fn layout(&self) -> FramebufferLayout {
        self.layout
    }

    fn rgb_shift(&self) -> RgbShift {
        RgbShift::default()
    }

    fn pitch(&self) -> Option<usize> {
        self.fixed_pitch
    }

    fn reconfigure(&self, desc: &VideoDesc, mode: VideoMode) -> bool {
        let mut state = self.state.lock().unwrap();
        state.reconfigure_calls += 1;
        state.config = Some((*desc, mode));
        true
    }

    fn get_frame(&self) -> DisplayFrame {
        let state = self.state.lock().unwrap();
        let (desc, _) = state.config.expect("get_frame before reconfigure");
        self.frame_for(&desc)
    }

    fn put_frame(&self, frame: DisplayFrame, policy: PutPolicy) -> PutResult {
        let mut state = self.state.lock().unwrap();
        match policy {
            PutPolicy::Discard => {
                state.discarded += 1;
                PutResult::Dropped
            }
            PutPolicy::Nonblock => {
                if state.stalled {
                    state.dropped += 1;
                    PutResult::Dropped
                } else {
                    state.displayed.push(frame);
                    PutResult::Displayed
                }
            }
            PutPolicy::Blocking => {
                while state.stalled {
                    state = self.cv.wait(state).unwrap();
                }
                state.displayed.push(frame);
                PutResult::Displayed
            }
        }
    }
}

// ── Scripted decompressor ────────────────────────────────────────

/// Factory producing decompressors that always answer with a fixed
/// status; `GotFrame` ones copy the source into the destination.
pub struct StubFactory {
    pub from: ColorSpec,
    pub to: ColorSpec,
    pub status: DecompressStatus,
    pub accepts_corrupted: bool,
    /// Source lengths of every decompress call, across all instances.
    pub calls: Arc<Mutex<Vec<usize>>>,
}

impl StubFactory {
    pub fn new(from: ColorSpec, to: ColorSpec, status: DecompressStatus) -> Arc<Self> {
        Arc::new(StubFactory {
            from,
            to,
            status,
            accepts_corrupted: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        })
    }
}

struct StubDecompressor {
    status: DecompressStatus,
    accepts_corrupted: bool,
    calls: Arc<Mutex<Vec<usize>>>,
}

impl Decompressor for StubDecompressor {
    fn reconfigure(
        &mut self,
        desc: &VideoDesc,
        _shift: RgbShift,
        pitch: usize,
        _out_codec: ColorSpec,
    ) -> Result<usize, DecodeError> {
        Ok(pitch * desc.height as usize)
    }

    fn decompress(&mut self, dst: &mut [u8], src: &[u8], _frame_seq: u32) -> DecompressStatus {
        self.calls.lock().unwrap().push(src.len());
        if self.status == DecompressStatus::GotFrame {
            let n = dst.len().min(src.len());
            dst[..n].copy_from_slice(&src[..n]);
        }
        self.status
    }

    fn accepts_corrupted_frames(&self) -> bool {
        self.accepts_corrupted
    }
}

impl DecompressorFactory for StubFactory {
    fn supports(&self, from: ColorSpec, to: ColorSpec) -> bool {
        from == self.from && to == self.to
    }

    fn create(&self) -> Box<dyn Decompressor> {
        Box::new(StubDecompressor {
            status: self.status,
            accepts_corrupted: self.accepts_corrupted,
            calls: Arc::clone(&self.calls),
        })
    }
}

// ── Mock FEC ─────────────────────────────────────────────────────

/// Deterministic duplicate-shard "FEC": the payload is split into `k`
/// shards, and shards `k..m` repeat shards `0..m-k`. A shard is
/// recoverable when it or its duplicate was received, which lets tests
/// choose exactly which loss patterns succeed.
pub struct MockFecFactory;

struct MockFecEngine {
    k: usize,
    m: usize,
}

impl FecFactory for MockFecFactory {
    fn kind(&self) -> FecKind {
        FecKind::ReedSolomon
    }

    fn create(&self, desc: &FecDesc) -> Result<Box<dyn FecEngine>, DecodeError> {
        if desc.k == 0 || desc.m < desc.k {
            return Err(DecodeError::FecInitFailed {
                kind: "mock",
                k: desc.k,
                m: desc.m,
            });
        }
        Ok(Box::new(MockFecEngine {
            k: desc.k as usize,
            m: desc.m as usize,
        }))
    }
}

impl FecEngine for MockFecEngine {
    fn decode(&mut self, fragments: &[u8], received: &BTreeMap<u32, u32>) -> Option<Vec<u8>> {
        let shard_size = fragments.len() / self.m;
        if shard_size == 0 {
            return None;
        }
        let have = |shard: usize| received.contains_key(&((shard * shard_size) as u32));
        let mut out = Vec::with_capacity(self.k * shard_size);
        for shard in 0..self.k {
            let source = if have(shard) {
                shard
            } else if shard + self.k < self.m && have(shard + self.k) {
                shard + self.k
            } else {
                return None;
            };
            out.extend_from_slice(&fragments[source * shard_size..(source + 1) * shard_size]);
        }
        Some(out)
    }
}

/// Sender-side encoding matching [`MockFecFactory`].
pub fn mock_fec_encode(payload: &[u8], k: u32, m: u32) -> Vec<u8> {
    let (k, m) = (k as usize, m as usize);
    let shard_size = (payload.len() + k - 1) / k;
    let mut block = vec![0u8; shard_size * m];
    for shard in 0..m {
        let source = if shard < k { shard } else { shard - k };
        let start = source * shard_size;
        let end = (start + shard_size).min(payload.len());
        if start < payload.len() {
            block[shard * shard_size..shard * shard_size + (end - start)]
                .copy_from_slice(&payload[start..end]);
        }
    }
    block
}

// ── XOR test cipher ──────────────────────────────────────────────

fn checksum(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |acc, &b| acc.wrapping_add(b as u32))
}

/// Toy authenticated cipher: XOR keystream plus a 4-byte additive tag
/// over plaintext and associated data.
pub struct XorDecryptor {
    pub key: u8,
}

impl Decryptor for XorDecryptor {
    fn decrypt(&mut self, ciphertext: &[u8], aad: &[u8], _mode: CipherMode) -> Option<Vec<u8>> {
        if ciphertext.len() < 4 {
            return None;
        }
        let (body, tag) = ciphertext.split_at(ciphertext.len() - 4);
        let plain: Vec<u8> = body.iter().map(|b| b ^ self.key).collect();
        let expected = u32::from_be_bytes(tag.try_into().unwrap());
        (checksum(&plain).wrapping_add(checksum(aad)) == expected).then_some(plain)
    }
}

pub fn xor_encrypt(plain: &[u8], aad: &[u8], key: u8) -> Vec<u8> {
    let mut out: Vec<u8> = plain.iter().map(|b| b ^ key).collect();
    out.extend_from_slice(
        &checksum(plain)
            .wrapping_add(checksum(aad))
            .to_be_bytes(),
    );
    out
}

// ── Packetizers ──────────────────────────────────────────────────

pub const TEST_MTU: usize = 1400;

/// Fragment one uncompressed (or opaque-bitstream) frame into wire
/// packets, highest substream first like the sender.
pub fn packetize_video(
    desc: &VideoDesc,
    buffer_num: u32,
    tile_payloads: &[Vec<u8>],
    encryption: Option<(u8, CipherMode)>,
) -> Vec<CodedPacket> {
    let pt = if encryption.is_some() {
        PayloadType::EncryptedVideo
    } else {
        PayloadType::Video
    };
    let mut packets = Vec::new();
    for (substream, payload) in tile_payloads.iter().enumerate().rev() {
        for (chunk_idx, chunk) in payload.chunks(TEST_MTU).enumerate() {
            let header = VideoHeader {
                substream: substream as u32,
                buffer_num,
                offset: (chunk_idx * TEST_MTU) as u32,
                length: payload.len() as u32,
                width: desc.width as u16,
                height: desc.height as u16,
                fourcc: desc.color_spec.fourcc(),
                interlacing: desc.interlacing,
                fps: desc.fps,
            };
            let mut data = Vec::with_capacity(24 + 4 + chunk.len() + 4);
            header.encode(&mut data);
            if let Some((key, mode)) = encryption {
                let aad_len = data.len();
                let crypto_word = (mode as u32) << 24;
                let ciphertext = xor_encrypt(chunk, &data[..aad_len], key);
                data.extend_from_slice(&crypto_word.to_be_bytes());
                data.extend_from_slice(&ciphertext);
            } else {
                data.extend_from_slice(chunk);
            }
            packets.push(CodedPacket {
                payload_type: pt as u8,
                ssrc: 0x5551,
                data,
            });
        }
    }
    packets
}

/// Build the FEC-protected packets of one frame: per tile, the inner
/// video header plus payload is mock-FEC-encoded and each fragment ships
/// as one packet. Fragment indices in `lose` are withheld.
pub fn packetize_fec(
    desc: &VideoDesc,
    buffer_num: u32,
    tile_payloads: &[Vec<u8>],
    k: u32,
    m: u32,
    seed: u32,
    lose: &[usize],
) -> Vec<CodedPacket> {
    let mut packets = Vec::new();
    for (substream, payload) in tile_payloads.iter().enumerate().rev() {
        let inner_header = VideoHeader {
            substream: substream as u32,
            buffer_num,
            offset: 0,
            length: payload.len() as u32,
            width: desc.width as u16,
            height: desc.height as u16,
            fourcc: desc.color_spec.fourcc(),
            interlacing: desc.interlacing,
            fps: desc.fps,
        };
        let mut protected = Vec::with_capacity(24 + payload.len());
        inner_header.encode(&mut protected);
        protected.extend_from_slice(payload);

        let block = mock_fec_encode(&protected, k, m);
        let shard_size = block.len() / m as usize;
        for fragment in 0..m as usize {
            if lose.contains(&fragment) {
                continue;
            }
            let header = FecHeader {
                substream: substream as u32,
                buffer_num,
                offset: (fragment * shard_size) as u32,
                length: block.len() as u32,
                k,
                m,
                c: 0,
                seed,
            };
            let mut data = Vec::with_capacity(20 + shard_size);
            header.encode(&mut data);
            data.extend_from_slice(&block[fragment * shard_size..(fragment + 1) * shard_size]);
            packets.push(CodedPacket {
                payload_type: PayloadType::VideoRs as u8,
                ssrc: 0x5551,
                data,
            });
        }
    }
    packets
}

/// A recognizable per-frame fill pattern.
pub fn patterned_payload(len: usize, frame: u32) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(31).wrapping_add(frame * 7) as u8)
        .collect()
}
