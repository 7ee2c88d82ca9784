//! Forward-error-correction contract.
//!
//! Concrete codecs (Reed-Solomon, LDGM) live outside this crate; the
//! pipeline only needs to create an engine from the wire descriptor and run
//! block reconstruction on it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

// ── FecKind ──────────────────────────────────────────────────────

/// FEC scheme selected by the payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FecKind {
    ReedSolomon,
    Ldgm,
}

impl FecKind {
    pub const fn name(self) -> &'static str {
        match self {
            FecKind::ReedSolomon => "Reed-Solomon",
            FecKind::Ldgm => "LDGM",
        }
    }
}

impl fmt::Display for FecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── FecDesc ──────────────────────────────────────────────────────

/// Per-stream FEC parameters, as carried in the FEC payload header.
///
/// `kind == None` means the stream is not FEC-protected and the remaining
/// fields are meaningless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FecDesc {
    pub kind: Option<FecKind>,
    pub k: u32,
    pub m: u32,
    pub c: u32,
    pub seed: u32,
}

impl FecDesc {
    pub const NONE: FecDesc = FecDesc {
        kind: None,
        k: 0,
        m: 0,
        c: 0,
        seed: 0,
    };
}

// ── Engine & factory ─────────────────────────────────────────────

/// A configured FEC decoder instance.
///
/// `decode` receives the raw fragment buffer of one substream together with
/// the map of received `offset → length` ranges, and returns the
/// reconstructed payload. `None` means reconstruction failed; the caller
/// marks the frame corrupted.
pub trait FecEngine: Send {
    fn decode(&mut self, fragments: &[u8], received: &BTreeMap<u32, u32>) -> Option<Vec<u8>>;
}

/// Factory resolving a wire descriptor into an engine.
pub trait FecFactory: Send + Sync {
    fn kind(&self) -> FecKind;

    fn create(&self, desc: &FecDesc) -> Result<Box<dyn FecEngine>, DecodeError>;
}
