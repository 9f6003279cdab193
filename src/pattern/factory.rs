//! [`Factory`]: the immutable, compiled form of a schema.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Block, Label};

/// A named subcontext declaration, as recorded by the compiler.
///
/// The `hash` is redundant with `label.djb2()` but is cached here since the
/// generator looks it up on every [`Block::Reference`] dispatch.
#[derive(Debug, Clone)]
pub struct SubcontextDecl {
    pub label: Label,
    pub hash: u64,
    pub child: Arc<Factory>,
}

/// Immutable compiled schema: a flat instruction stream plus the table of
/// named subcontexts it can reference.
///
/// A `Factory` is produced once by [`crate::pattern::compiler::compile`] and
/// may be shared by reference across many [`crate::generator::Generator`]s —
/// all per-generator mutable state (PRNG, counters, and each subcontext's
/// `most_recent` cache) lives in the generator, not here (see `spec.md` §5).
#[derive(Debug, Clone)]
pub struct Factory {
    pub(crate) instructions: Vec<Block>,
    pub(crate) subcontexts: Vec<SubcontextDecl>,
    pub(crate) label_index: HashMap<Label, usize>,
    pub(crate) max_output_size: usize,
}

impl Factory {
    pub(crate) fn new(
        instructions: Vec<Block>,
        subcontexts: Vec<SubcontextDecl>,
        max_output_size: usize,
    ) -> Self {
        let label_index = subcontexts
            .iter()
            .enumerate()
            .map(|(i, decl)| (decl.label, i))
            .collect();
        Self {
            instructions,
            subcontexts,
            label_index,
            max_output_size,
        }
    }

    pub fn instructions(&self) -> &[Block] {
        &self.instructions
    }

    pub fn subcontext_count(&self) -> usize {
        self.subcontexts.len()
    }

    pub fn find_subcontext(&self, label: Label) -> Option<usize> {
        self.label_index.get(&label).copied()
    }

    pub fn subcontext(&self, index: usize) -> &SubcontextDecl {
        &self.subcontexts[index]
    }

    /// A rough upper bound on the bytes one generation could emit, used by
    /// the CLI to pre-size buffers; not authoritative (the true bound is
    /// `pool_size`, enforced by the generator at runtime).
    pub fn max_output_size(&self) -> usize {
        self.max_output_size
    }
}
