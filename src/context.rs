//! The public façade: [`Fuzzer`], the type most callers construct directly.
//!
//! Compiles a schema once into a [`Factory`](crate::pattern::factory::Factory)
//! and hands back a ready-to-use generator. Construction is the only place
//! compile errors surface; every call after that can only fail with a
//! [`GenerationError`].

use std::sync::Arc;

use log::{debug, warn};

use crate::error::NanofuzzError;
use crate::generator::{Generator, StreamError};
use crate::pattern::compiler::compile;
use crate::prng::Prng;

const MIB: usize = 1024 * 1024;

/// Named pool-size presets, per `spec.md` §6 ("standard sizes Tiny=1,
/// Small=4, Normal=16, Large=128, Extreme=1024 MiB").
pub const POOL_TINY: usize = MIB;
pub const POOL_SMALL: usize = 4 * MIB;
pub const POOL_NORMAL: usize = 16 * MIB;
pub const POOL_LARGE: usize = 128 * MIB;
pub const POOL_EXTREME: usize = 1024 * MIB;

/// Default pool size (in bytes) when the caller doesn't specify one: the
/// `Normal` preset.
pub const DEFAULT_POOL_SIZE: usize = POOL_NORMAL;

/// Parse one of the named presets (`tiny`, `small`, `normal`, `large`,
/// `extreme`, case-insensitive), or `None` if `name` isn't a preset.
pub fn named_pool_size(name: &str) -> Option<usize> {
    match name.to_ascii_lowercase().as_str() {
        "tiny" => Some(POOL_TINY),
        "small" => Some(POOL_SMALL),
        "normal" => Some(POOL_NORMAL),
        "large" => Some(POOL_LARGE),
        "extreme" => Some(POOL_EXTREME),
        _ => None,
    }
}

/// A compiled schema bound to one generation stream.
///
/// Cheap to construct more of from the same schema text (recompiling is the
/// expensive part) — if many independent streams are needed, prefer sharing
/// a `Factory` directly via [`Generator::new`] instead of going through
/// `Fuzzer::new` repeatedly.
pub struct Fuzzer {
    generator: Generator,
}

impl Fuzzer {
    /// Compile `schema` and seed a generator explicitly.
    pub fn new(schema: &[u8], seed: u64, pool_size: usize) -> Result<Self, NanofuzzError> {
        let (factory, errors) = compile(schema);
        let factory = factory.ok_or(NanofuzzError::Compile(errors))?;
        debug!(
            "compiled schema into {} instructions, {} subcontexts",
            factory.instructions().len(),
            factory.subcontext_count()
        );
        let generator = Generator::new(Arc::new(factory), Prng::from_seed(seed), pool_size);
        Ok(Self { generator })
    }

    /// Compile `schema` and seed a generator from a time-derived source, with
    /// [`DEFAULT_POOL_SIZE`].
    pub fn new_default(schema: &[u8]) -> Result<Self, NanofuzzError> {
        let (factory, errors) = compile(schema);
        let factory = factory.ok_or(NanofuzzError::Compile(errors))?;
        let generator = Generator::new(Arc::new(factory), Prng::from_time(), DEFAULT_POOL_SIZE);
        Ok(Self { generator })
    }

    /// Draw the next value.
    pub fn next(&mut self) -> Result<&[u8], NanofuzzError> {
        self.generator.next().map_err(NanofuzzError::from)
    }

    /// Draw the next value directly into `sink` without owning the output.
    pub fn next_to_stream(&mut self, sink: &mut impl std::io::Write) -> Result<usize, NanofuzzError> {
        self.generator.next_to_stream(sink).map_err(|e| match e {
            StreamError::Generation(g) => NanofuzzError::Generation(g),
            StreamError::Io(io) => NanofuzzError::Io(io),
        })
    }

    /// Change the maximum output size enforced on every future draw,
    /// including for nested subcontexts.
    pub fn resize(&mut self, pool_size: usize) {
        self.generator.set_pool_size(pool_size);
    }

    pub fn pool_size(&self) -> usize {
        self.generator.pool_size()
    }
}

impl Drop for Fuzzer {
    fn drop(&mut self) {
        // Subcontext generators are owned through `Box`/`Vec` and tear down
        // recursively for free; this exists to make that explicit and to
        // give a hook for the day shutdown needs more than that.
        warn!("dropping fuzzer for a schema with {} subcontexts",
            self.generator.factory().subcontext_count());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_error_surfaces_as_nanofuzz_error() {
        let err = Fuzzer::new(b"a(bcd", 1, DEFAULT_POOL_SIZE).unwrap_err();
        assert!(matches!(err, NanofuzzError::Compile(_)));
    }

    #[test]
    fn next_to_stream_writes_all_bytes() {
        let mut fuzzer = Fuzzer::new(b"abc", 1, DEFAULT_POOL_SIZE).unwrap();
        let mut out = Vec::new();
        let n = fuzzer.next_to_stream(&mut out).unwrap();
        assert_eq!(n, 3);
        assert_eq!(out, b"abc");
    }

    #[test]
    fn named_pool_sizes_resolve_to_mib_presets() {
        assert_eq!(named_pool_size("tiny"), Some(POOL_TINY));
        assert_eq!(named_pool_size("NORMAL"), Some(POOL_NORMAL));
        assert_eq!(named_pool_size("extreme"), Some(POOL_EXTREME));
        assert_eq!(named_pool_size("bogus"), None);
        assert_eq!(DEFAULT_POOL_SIZE, POOL_NORMAL);
    }

    #[test]
    fn resize_affects_subsequent_draws() {
        let mut fuzzer = Fuzzer::new(b"a{100}", 1, 4).unwrap();
        assert!(fuzzer.next().is_err());
        fuzzer.resize(1024);
        assert!(fuzzer.next().is_ok());
    }
}
