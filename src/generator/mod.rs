//! The interpreter: walks a [`Factory`]'s flat instruction stream, drawing
//! from a seeded [`Prng`], and fills an output buffer.
//!
//! A `Generator` owns all the mutable state a run needs — the PRNG, the
//! output buffer, the nested-repetition counters, and one child `Generator`
//! per named subcontext. The `Factory` it walks is immutable and can be
//! shared (via `Arc`) by many generators at once; see `spec.md` §5.

use std::sync::Arc;

use log::trace;

use crate::error::GenerationError;
use crate::pattern::factory::Factory;
use crate::pattern::{Block, LengthKind, LengthOpts, ReferenceMode, MAX_NEST};
use crate::prng::Prng;

/// One nested-repetition frame, pushed by [`Block::Sub`] and popped by its
/// matching [`Block::Ret`].
#[derive(Clone, Copy, Debug, Default)]
struct Counter {
    how_many: u16,
    generated: u16,
}

/// Per-generator state for one named subcontext: its own child `Generator`
/// (boxed, since `Generator` is self-referential through this field) plus the
/// cached bytes from its most recent draw.
struct SubcontextRuntime {
    generator: Box<Generator>,
    most_recent: Option<Box<[u8]>>,
    /// Set once a `<%LABEL>` has reshuffled this subcontext during the
    /// current top-level `next()` call, so a second `<%LABEL>` in the same
    /// generation is a no-op (spec.md §4.4: "at most once per `next` per
    /// subcontext regardless of iters").
    shuffled_this_call: bool,
}

/// Executes a compiled [`Factory`], producing byte strings.
pub struct Generator {
    factory: Arc<Factory>,
    prng: Prng,
    buffer: Vec<u8>,
    pool_size: usize,
    counters: [Counter; MAX_NEST],
    nest_level: usize,
    subcontexts: Vec<SubcontextRuntime>,
}

impl Generator {
    pub fn new(factory: Arc<Factory>, prng: Prng, pool_size: usize) -> Self {
        let subcontexts = (0..factory.subcontext_count())
            .map(|i| {
                let decl = factory.subcontext(i);
                SubcontextRuntime {
                    generator: Box::new(Generator::new(
                        Arc::clone(&decl.child),
                        Prng::from_seed(decl.hash),
                        pool_size,
                    )),
                    most_recent: None,
                    shuffled_this_call: false,
                }
            })
            .collect();
        Self {
            factory,
            prng,
            buffer: Vec::new(),
            pool_size,
            counters: [Counter::default(); MAX_NEST],
            nest_level: 0,
            subcontexts,
        }
    }

    pub fn factory(&self) -> &Arc<Factory> {
        &self.factory
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn set_pool_size(&mut self, pool_size: usize) {
        self.pool_size = pool_size;
        for sub in &mut self.subcontexts {
            sub.generator.set_pool_size(pool_size);
        }
    }

    /// Generate one value, returning its bytes. On error the generator's
    /// internal state is reset and it is ready for the next call.
    pub fn next(&mut self) -> Result<&[u8], GenerationError> {
        self.buffer.clear();
        self.reset_counters();
        for sub in &mut self.subcontexts {
            sub.shuffled_this_call = false;
        }
        match self.run() {
            Ok(()) => Ok(&self.buffer),
            Err(e) => {
                self.buffer.clear();
                self.reset_counters();
                Err(e)
            }
        }
    }

    /// Generate one value directly into `sink`, without owning the output.
    /// Returns the number of bytes written.
    pub fn next_to_stream(&mut self, sink: &mut impl std::io::Write) -> Result<usize, StreamError> {
        let bytes = self.next()?;
        sink.write_all(bytes).map_err(StreamError::Io)?;
        Ok(bytes.len())
    }

    fn reset_counters(&mut self) {
        self.counters = [Counter::default(); MAX_NEST];
        self.nest_level = 0;
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), GenerationError> {
        if self.buffer.len() + bytes.len() > self.pool_size {
            trace!(
                "pool exceeded: {} buffered + {} incoming > pool size {}",
                self.buffer.len(),
                bytes.len(),
                self.pool_size
            );
            return Err(GenerationError::PoolExceeded);
        }
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    /// The dispatch loop proper: walks `factory.instructions()` from `ip = 0`
    /// until a [`Block::End`].
    ///
    /// `nullified` tracks the one active nullification, as an index into
    /// `self.counters` naming the `Sub` frame whose zero count triggered it
    /// (`spec.md` §4.4/§9: "a transient pointer in the source; reimplement
    /// as an `Option<usize>`"). While it is set, every instruction other
    /// than `Sub`/`Ret` is bypassed without being dispatched at all — in
    /// particular a bypassed `Sub`'s repetition count is never sampled and a
    /// bypassed `Reference`/`BranchRoot` never touches the PRNG or the
    /// subcontext cache. A nested `Sub`/`Ret` pair *is* still dispatched
    /// normally even while nullified (it just can't set a second, nested
    /// nullification), so its own repetition count is sampled exactly as it
    /// would be outside a nullified body.
    fn run(&mut self) -> Result<(), GenerationError> {
        let factory = Arc::clone(&self.factory);
        let instructions = factory.instructions();
        let mut ip: usize = 0;
        let mut nullified: Option<usize> = None;
        loop {
            let block = &instructions[ip];
            if nullified.is_some() && !matches!(block, Block::Sub { .. } | Block::Ret { .. }) {
                ip += 1;
                continue;
            }
            match block {
                Block::String { bytes, count } => {
                    let n = count.sample(&mut self.prng);
                    for _ in 0..n {
                        self.push_bytes(bytes)?;
                    }
                    ip += 1;
                }
                Block::Range { fragments, count } => {
                    let n = count.sample(&mut self.prng);
                    for _ in 0..n {
                        let byte = self.sample_range(fragments);
                        self.push_bytes(&[byte])?;
                    }
                    ip += 1;
                }
                Block::Sub { count } => {
                    let how_many = count.sample(&mut self.prng);
                    let frame_idx = self.nest_level;
                    if frame_idx >= MAX_NEST {
                        trace!("nest level {frame_idx} at ip {ip}, clamping");
                    } else {
                        self.counters[frame_idx] = Counter {
                            how_many,
                            generated: 0,
                        };
                        self.nest_level += 1;
                    }
                    if how_many == 0 && nullified.is_none() {
                        nullified = Some(frame_idx);
                    }
                    ip += 1;
                }
                Block::Ret { back_count } => {
                    let frame_idx = self.nest_level - 1;
                    if nullified == Some(frame_idx) {
                        nullified = None;
                        self.counters[frame_idx].how_many = 0;
                        self.nest_level -= 1;
                        ip += 1;
                    } else {
                        self.counters[frame_idx].generated += 1;
                        if self.counters[frame_idx].generated < self.counters[frame_idx].how_many {
                            ip -= *back_count as usize;
                        } else {
                            self.nest_level -= 1;
                            ip += 1;
                        }
                    }
                }
                Block::Reference {
                    label,
                    mode,
                    lenopts,
                    count,
                } => {
                    let idx = match self.factory.find_subcontext(*label) {
                        Some(idx) => idx,
                        None => {
                            trace!("reference to unknown subcontext label {label}");
                            return Err(GenerationError::MissingSubcontext);
                        }
                    };
                    let n = count.sample(&mut self.prng);
                    match mode {
                        ReferenceMode::Paste | ReferenceMode::Length => {
                            for _ in 0..n {
                                self.resolve_reference(idx, *mode, lenopts.as_ref())?;
                            }
                        }
                        // Shuffle ignores the sampled iteration count: it
                        // reshuffles the subcontext at most once per call and
                        // emits no bytes of its own.
                        ReferenceMode::Shuffle => {
                            self.resolve_reference(idx, *mode, lenopts.as_ref())?;
                        }
                    }
                    ip += 1;
                }
                Block::BranchRoot { steps } => {
                    let chosen = self.prng.next_bounded(0, steps.len() as u64 - 1) as usize;
                    ip += steps[chosen] as usize;
                }
                Block::BranchJmp { delta } => {
                    ip += *delta as usize;
                }
                Block::End => return Ok(()),
            }
        }
    }

    fn sample_range(&mut self, fragments: &[crate::pattern::RangeFragment]) -> u8 {
        let total: u32 = fragments.iter().map(|f| f.len()).sum();
        let mut pick = self.prng.next_bounded(0, total as u64 - 1) as u32;
        for frag in fragments {
            let len = frag.len();
            if pick < len {
                return frag.base + pick as u8;
            }
            pick -= len;
        }
        fragments[0].base
    }

    fn resolve_reference(
        &mut self,
        idx: usize,
        mode: ReferenceMode,
        lenopts: Option<&LengthOpts>,
    ) -> Result<(), GenerationError> {
        if mode == ReferenceMode::Shuffle {
            if !self.subcontexts[idx].shuffled_this_call {
                self.regen_subcontext(idx)?;
                self.subcontexts[idx].shuffled_this_call = true;
            }
            return Ok(());
        }

        if self.subcontexts[idx].most_recent.is_none() {
            self.regen_subcontext(idx)?;
        }
        let cached = self.subcontexts[idx]
            .most_recent
            .as_ref()
            .expect("populated above")
            .clone();
        match mode {
            ReferenceMode::Paste => self.push_bytes(&cached),
            ReferenceMode::Length => {
                let opts = lenopts.ok_or(GenerationError::MalformedLengthWidth)?;
                let formatted = format_length(cached.len(), opts)?;
                self.push_bytes(&formatted)
            }
            ReferenceMode::Shuffle => unreachable!("handled above"),
        }
    }

    /// Frees the subcontext's cached artifact and drives its child generator
    /// once, replacing the cache with the fresh draw.
    fn regen_subcontext(&mut self, idx: usize) -> Result<(), GenerationError> {
        let fresh = self.subcontexts[idx].generator.next()?.to_vec();
        self.subcontexts[idx].most_recent = Some(fresh.into_boxed_slice());
        Ok(())
    }
}

fn format_length(len: usize, opts: &LengthOpts) -> Result<Vec<u8>, GenerationError> {
    let adjusted = (len as i64 + opts.add).max(0) as u64;
    if opts.kind.is_raw() {
        let width = if opts.width == 0 { 8 } else { opts.width as usize };
        if width == 0 || width > 8 {
            return Err(GenerationError::MalformedLengthWidth);
        }
        let full = adjusted.to_le_bytes();
        return Ok(match opts.kind {
            LengthKind::RawLittle => full[..width].to_vec(),
            LengthKind::RawBig => {
                let mut be = full;
                be.reverse();
                be[8 - width..].to_vec()
            }
            _ => unreachable!("is_raw only matches RawLittle/RawBig"),
        });
    }

    // Textual kinds overflow modulo the natural base raised to `width`
    // rather than growing past it — the overflow is documented and
    // intentional (`spec.md` §4.4/§9).
    let base: u64 = match opts.kind {
        LengthKind::Binary => 2,
        LengthKind::Decimal => 10,
        LengthKind::Hexadecimal | LengthKind::HexUpper => 16,
        LengthKind::Octal => 8,
        LengthKind::RawLittle | LengthKind::RawBig => unreachable!("handled above"),
    };
    let width = opts.width as usize;
    let wrapped = match base.checked_pow(opts.width as u32) {
        Some(modulus) if width > 0 => adjusted % modulus,
        _ => adjusted,
    };
    let digits = match opts.kind {
        LengthKind::Binary => format!("{wrapped:b}"),
        LengthKind::Decimal => format!("{wrapped}"),
        LengthKind::Hexadecimal => format!("{wrapped:x}"),
        LengthKind::HexUpper => format!("{wrapped:X}"),
        LengthKind::Octal => format!("{wrapped:o}"),
        LengthKind::RawLittle | LengthKind::RawBig => unreachable!("handled above"),
    };
    let padded = if digits.len() < width {
        format!("{}{}", "0".repeat(width - digits.len()), digits)
    } else {
        digits
    };
    Ok(padded.into_bytes())
}

/// Error surface for [`Generator::next_to_stream`], bridging a generation
/// failure with the fallibility of the caller's `io::Write` sink.
#[derive(Debug)]
pub enum StreamError {
    Generation(GenerationError),
    Io(std::io::Error),
}

impl From<GenerationError> for StreamError {
    fn from(e: GenerationError) -> Self {
        StreamError::Generation(e)
    }
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::Generation(e) => write!(f, "{e}"),
            StreamError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for StreamError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::compiler::compile;

    fn generator_for(schema: &str, pool_size: usize) -> Generator {
        let (factory, errors) = compile(schema.as_bytes());
        assert!(errors.is_empty(), "{errors}");
        Generator::new(Arc::new(factory.unwrap()), Prng::from_seed(1), pool_size)
    }

    #[test]
    fn literal_emits_exact_bytes() {
        let mut gen = generator_for("abc", 64);
        assert_eq!(gen.next().unwrap(), b"abc");
    }

    #[test]
    fn fixed_repetition_emits_fixed_length() {
        let mut gen = generator_for("a{5}", 64);
        assert_eq!(gen.next().unwrap(), b"aaaaa");
    }

    #[test]
    fn zero_repetition_emits_nothing() {
        let mut gen = generator_for("(ab){0,0}cd", 64);
        assert_eq!(gen.next().unwrap(), b"cd");
    }

    #[test]
    fn range_draws_within_bounds() {
        let mut gen = generator_for("[A-C]{20}", 64);
        let out = gen.next().unwrap().to_vec();
        assert_eq!(out.len(), 20);
        assert!(out.iter().all(|b| (b'A'..=b'C').contains(b)));
    }

    #[test]
    fn pool_exceeded_is_reported_and_recoverable() {
        let mut gen = generator_for("a{100}", 10);
        assert_eq!(gen.next(), Err(GenerationError::PoolExceeded));
        // generator must be usable again afterwards
        let mut gen2 = generator_for("ab", 10);
        assert_eq!(gen2.next().unwrap(), b"ab");
    }

    #[test]
    fn paste_reference_repeats_cached_value() {
        let mut gen = generator_for("(x){1}<$L><@L><@L>", 64);
        let out = gen.next().unwrap().to_vec();
        // "x" once inline, then the same cached subcontext draw pasted twice
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], out[1]);
        assert_eq!(out[1], out[2]);
    }

    #[test]
    fn length_reference_formats_decimal() {
        let mut gen = generator_for("(abc){1}<$L><#L>", 64);
        let out = gen.next().unwrap().to_vec();
        assert_eq!(&out[..3], b"abc");
        assert_eq!(&out[3..], b"3");
    }

    #[test]
    fn shuffle_emits_nothing_and_only_fires_once_per_call() {
        // declares L as a single random byte from [A-Z]; shuffles twice, then
        // pastes once. The emitted output must be just the one pasted byte
        // (both shuffles are silent), and it must be a valid [A-Z] byte.
        let mut gen = generator_for("([A-Z]){1}<$L><%L><%L><@L>", 64);
        let out = gen.next().unwrap().to_vec();
        assert_eq!(out.len(), 1);
        assert!((b'A'..=b'Z').contains(&out[0]));
    }

    #[test]
    fn shuffle_can_change_paste_between_calls() {
        let mut gen = generator_for("([A-Z]){1}<$L><@L><%L><@L>", 64);
        let out = gen.next().unwrap().to_vec();
        assert_eq!(out.len(), 2);
        // before the shuffle and after it, both pastes are independently
        // valid draws (possibly equal, possibly not) -- the important
        // invariant is that the shuffle itself contributed no bytes.
        assert!((b'A'..=b'Z').contains(&out[0]));
        assert!((b'A'..=b'Z').contains(&out[1]));
    }

    #[test]
    fn deterministic_with_same_seed() {
        let mut a = generator_for("[a-z]{10}(x|y){1,3}", 256);
        let mut b = generator_for("[a-z]{10}(x|y){1,3}", 256);
        assert_eq!(a.next().unwrap(), b.next().unwrap());
    }

    #[test]
    fn nullified_body_emits_nothing_but_still_dispatches_nested_sub_ret() {
        // The outer group is forced to zero iterations, so nothing it (or
        // its nested `(b){2,4}` group) contains is emitted -- "a", "b" and
        // "c" must all be absent. The nested group's own count is still
        // sampled and its own Ret still loops internally rather than the
        // whole span being skipped as one structural jump; since every leaf
        // instruction inside stays bypassed either way, the only
        // externally visible difference is that the trailing `[A-Z]{1}`
        // reference is reached after those extra (silent) PRNG draws.
        let mut gen = generator_for("(a(b){2,4}c){0,0}d[A-Z]{1}", 64);
        let out = gen.next().unwrap().to_vec();
        assert_eq!(out.len(), 2);
        assert_eq!(&out[..1], b"d");
        assert!((b'A'..=b'Z').contains(&out[1]));
    }

    #[test]
    fn length_reference_decimal_width_wraps_on_overflow() {
        let opts = LengthOpts {
            kind: LengthKind::Decimal,
            width: 2,
            add: 0,
        };
        // 123 has three decimal digits; with width 2 it wraps mod 100
        // instead of overflowing the field, per the documented,
        // intentional overflow behavior.
        assert_eq!(format_length(123, &opts).unwrap(), b"23");
    }

    #[test]
    fn length_reference_decimal_width_still_pads_short_values() {
        let opts = LengthOpts {
            kind: LengthKind::Decimal,
            width: 4,
            add: 0,
        };
        assert_eq!(format_length(7, &opts).unwrap(), b"0007");
    }
}
