//! Codec capability object.
//!
//! One immutable [`Codecs`] instance is captured at decoder construction
//! and consulted for every codec decision: line transforms between pixel
//! formats, external decompressors for opaque bitstreams, and FEC engine
//! factories. Hosts extend it with their own plugins before building the
//! decoder.

use std::sync::Arc;

use crate::decompress::DecompressorFactory;
use crate::desc::ColorSpec;
use crate::fec::{FecFactory, FecKind};
use crate::transform::{builtin_line_transforms, LineDecodeFn, LineTransform};

/// Registry of everything the decoder can decode with.
pub struct Codecs {
    line: Vec<LineTransform>,
    decompressors: Vec<Arc<dyn DecompressorFactory>>,
    fec: Vec<Arc<dyn FecFactory>>,
}

impl Default for Codecs {
    /// The built-in line transforms, no decompressors, no FEC.
    fn default() -> Self {
        Codecs {
            line: builtin_line_transforms(),
            decompressors: Vec::new(),
            fec: Vec::new(),
        }
    }
}

impl Codecs {
    /// An entirely empty registry (useful for tests).
    pub fn empty() -> Self {
        Codecs {
            line: Vec::new(),
            decompressors: Vec::new(),
            fec: Vec::new(),
        }
    }

    pub fn register_line_transform(&mut self, transform: LineTransform) -> &mut Self {
        self.line.push(transform);
        self
    }

    pub fn register_decompressor(&mut self, factory: Arc<dyn DecompressorFactory>) -> &mut Self {
        self.decompressors.push(factory);
        self
    }

    pub fn register_fec(&mut self, factory: Arc<dyn FecFactory>) -> &mut Self {
        self.fec.push(factory);
        self
    }

    /// Look up a registered line transform.
    ///
    /// Fast transforms match regardless of `include_slow`; slow ones only
    /// when asked for.
    pub fn line_transform(
        &self,
        from: ColorSpec,
        to: ColorSpec,
        include_slow: bool,
    ) -> Option<LineDecodeFn> {
        self.line
            .iter()
            .find(|t| t.from == from && t.to == to && (include_slow || !t.slow))
            .map(|t| t.func)
    }

    /// First decompressor factory advertising support for `from → to`.
    pub fn decompressor_for(
        &self,
        from: ColorSpec,
        to: ColorSpec,
    ) -> Option<Arc<dyn DecompressorFactory>> {
        self.decompressors
            .iter()
            .find(|f| f.supports(from, to))
            .cloned()
    }

    /// FEC factory for the given scheme.
    pub fn fec_factory(&self, kind: FecKind) -> Option<&Arc<dyn FecFactory>> {
        self.fec.iter().find(|f| f.kind() == kind)
    }
}
