//! Hand-written lexer / recursive-descent parser: schema text → flat
//! instruction stream (+ named subcontexts).
//!
//! No parsing crate is used here on purpose — nanofuzz's pattern language is
//! not a regular expression and gets its own from-scratch compiler, the way
//! [`crate::pattern::factory::Factory`] is meant to be built once and shared.

use std::collections::HashSet;
use std::sync::Arc;

use log::debug;

use crate::error::{ErrorCode, ErrorTrace};
use crate::pattern::factory::{Factory, SubcontextDecl};
use crate::pattern::{
    Block, Label, LengthKind, LengthOpts, RangeFragment, ReferenceMode, Repetition,
    MAX_ALTERNATION_ARMS, MAX_NEST, MAX_RANGE_FRAGMENTS, MAX_SUBCONTEXTS,
};

/// Maximum schema length accepted by [`compile`], per `spec.md` §6.
pub const MAX_SCHEMA_LEN: usize = 16 * 1024 * 1024;

/// Compile a schema into a [`Factory`], or a populated [`ErrorTrace`] on
/// failure. Never panics on malformed input.
pub fn compile(schema: &[u8]) -> (Option<Factory>, ErrorTrace) {
    if schema.len() > MAX_SCHEMA_LEN {
        let mut errors = ErrorTrace::new();
        errors.add(0, 0, ErrorCode::InvalidSyntax, "schema exceeds 16 MiB");
        return (None, errors);
    }

    let mut compiler = Compiler::new(schema);
    let body = compiler.parse_alternation(0, &[]);
    match body {
        Some(mut instructions) if compiler.errors.is_empty() => {
            instructions.push(Block::End);
            let max_output_size = estimate_max_size(&instructions);
            let factory = Factory::new(instructions, compiler.subcontexts, max_output_size);
            (Some(factory), compiler.errors)
        }
        _ => {
            if compiler.errors.is_empty() {
                compiler
                    .errors
                    .add(0, compiler.pos, ErrorCode::InvalidSyntax, "compilation failed");
            }
            (None, compiler.errors)
        }
    }
}

struct Compiler<'a> {
    src: &'a [u8],
    pos: usize,
    errors: ErrorTrace,
    subcontexts: Vec<SubcontextDecl>,
    declared: HashSet<Label>,
}

impl<'a> Compiler<'a> {
    fn new(src: &'a [u8]) -> Self {
        Self {
            src,
            pos: 0,
            errors: ErrorTrace::new(),
            subcontexts: Vec::new(),
            declared: HashSet::new(),
        }
    }

    fn fail(&mut self, nest: usize, code: ErrorCode, text: impl Into<String>) {
        let text = text.into();
        debug!("[Err {code}] [Nest {nest}] [Index {}] {text}", self.pos);
        self.errors.add(nest, self.pos, code, text);
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek();
        if b.is_some() {
            self.pos += 1;
        }
        b
    }

    fn eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    /// Parses one or more `|`-separated arms ending at a byte in `stop` (or
    /// EOF). Returns the flat instruction list for the whole construct.
    fn parse_alternation(&mut self, nest: usize, stop: &[u8]) -> Option<Vec<Block>> {
        let mut arms: Vec<Vec<Block>> = Vec::new();
        loop {
            let arm = self.parse_sequence(nest, stop)?;
            arms.push(arm);
            if self.peek() == Some(b'|') {
                self.pos += 1;
                continue;
            }
            break;
        }
        if arms.len() == 1 {
            Some(arms.into_iter().next().unwrap())
        } else {
            self.build_alternation(nest, arms)
        }
    }

    fn build_alternation(&mut self, nest: usize, arms: Vec<Vec<Block>>) -> Option<Vec<Block>> {
        if arms.len() > MAX_ALTERNATION_ARMS {
            self.fail(nest, ErrorCode::InvalidSyntax, "too many alternation arms");
            return None;
        }
        if arms.iter().any(|arm| arm.is_empty()) {
            self.fail(nest, ErrorCode::InvalidSyntax, "empty alternation arm");
            return None;
        }
        let mut out = Vec::new();
        // Reserve the BranchRoot slot; patched once arm offsets are known.
        let root_idx = out.len();
        out.push(Block::BranchRoot {
            steps: Box::new([]),
        });
        let mut steps = Vec::with_capacity(arms.len());
        let last = arms.len() - 1;
        for (i, arm) in arms.into_iter().enumerate() {
            let arm_start = out.len() as u32 - root_idx as u32;
            steps.push(arm_start);
            out.extend(arm);
            if i != last {
                // Placeholder, patched to a real forward delta in the second pass below.
                out.push(Block::BranchJmp { delta: u32::MAX });
            }
        }
        let end_offset = out.len() as u32;
        // Second pass: each BranchJmp placeholder becomes a forward delta to
        // the position right after the whole alternation.
        for (idx, block) in out.iter_mut().enumerate() {
            if let Block::BranchJmp { delta } = block {
                if *delta == u32::MAX {
                    *delta = end_offset - idx as u32;
                }
            }
        }
        out[root_idx] = Block::BranchRoot {
            steps: steps.into_boxed_slice(),
        };
        Some(out)
    }

    /// Parses one alternation arm: a run of terms until a stop byte or EOF.
    fn parse_sequence(&mut self, nest: usize, stop: &[u8]) -> Option<Vec<Block>> {
        let mut seq: Vec<Block> = Vec::new();
        loop {
            match self.peek() {
                None => break,
                Some(b) if b == b'|' || stop.contains(&b) => break,
                Some(b'[') => {
                    let block = self.parse_class(nest)?;
                    seq.push(block);
                    self.apply_trailing_repetition(nest, &mut seq)?;
                }
                Some(b'(') => {
                    self.parse_group(nest, &mut seq)?;
                }
                Some(b'<') => {
                    self.parse_angle(nest, &mut seq)?;
                }
                Some(b'{') => {
                    self.fail(nest, ErrorCode::InvalidSyntax, "{} preceding no prior block");
                    return None;
                }
                Some(b) if b == b')' || b == b'}' || b == b']' || b == b'>' => {
                    self.fail(
                        nest,
                        ErrorCode::InvalidSyntax,
                        format!("stray '{}'", b as char),
                    );
                    return None;
                }
                Some(_) => {
                    self.parse_literal_run(nest, &mut seq)?;
                }
            }
        }
        Some(seq)
    }

    /// Consumes one or more literal bytes, splitting the last one into its
    /// own `String` block when immediately followed by `{...}` (so
    /// `abc{3}` reads as "a, b, then c repeated 3 times").
    fn parse_literal_run(&mut self, nest: usize, seq: &mut Vec<Block>) -> Option<()> {
        let mut buf: Vec<u8> = Vec::new();
        loop {
            match self.peek() {
                Some(b'\\') => {
                    let byte = self.parse_escape(nest)?;
                    buf.push(byte);
                }
                Some(b) if is_literal_stopper(b) => break,
                Some(b) => {
                    self.pos += 1;
                    buf.push(b);
                }
                None => break,
            }
            if self.peek() == Some(b'{') {
                break;
            }
        }
        if buf.is_empty() {
            return Some(());
        }
        if self.peek() == Some(b'{') && buf.len() > 1 {
            let last = buf.pop().unwrap();
            seq.push(Block::String {
                bytes: buf.into_boxed_slice(),
                count: Repetition::exactly(1),
            });
            seq.push(Block::String {
                bytes: Box::new([last]),
                count: Repetition::exactly(1),
            });
        } else {
            seq.push(Block::String {
                bytes: buf.into_boxed_slice(),
                count: Repetition::exactly(1),
            });
        }
        self.apply_trailing_repetition(nest, seq)
    }

    /// Parses one `\...` escape (backslash not yet consumed). Shared between
    /// literal text and character-class tokens: `\x37`/`\d055`/`\o067` are
    /// numeric byte escapes wherever they appear, not just inside `[...]`
    /// (see `spec.md`'s `\r\n\x37\f\s` scenario, which relies on this).
    fn parse_escape(&mut self, nest: usize) -> Option<u8> {
        self.pos += 1; // consume backslash
        match self.peek() {
            None => {
                self.fail(nest, ErrorCode::InvalidSyntax, "invalid escape at end of input");
                None
            }
            Some(b',') => {
                self.pos += 1;
                Some(b',')
            }
            Some(b'-') => {
                self.pos += 1;
                Some(b'-')
            }
            Some(c) if c == b'x' || c == b'X' => {
                self.pos += 1;
                self.parse_numeric_escape(nest, 16, 2)
            }
            Some(c) if c == b'd' || c == b'D' => {
                self.pos += 1;
                self.parse_numeric_escape(nest, 10, 3)
            }
            Some(c) if c == b'o' || c == b'O' => {
                self.pos += 1;
                self.parse_numeric_escape(nest, 8, 3)
            }
            Some(c) => {
                self.pos += 1;
                Some(escape_byte(c))
            }
        }
    }

    /// If the next byte is `{`, parses a repetition suffix and applies it to
    /// the last block in `seq`.
    fn apply_trailing_repetition(&mut self, nest: usize, seq: &mut Vec<Block>) -> Option<()> {
        if self.peek() != Some(b'{') {
            return Some(());
        }
        let rep = self.parse_repetition(nest)?;
        match seq.last_mut() {
            Some(Block::String { count, .. })
            | Some(Block::Range { count, .. })
            | Some(Block::Sub { count })
            | Some(Block::Reference { count, .. }) => {
                *count = rep;
                Some(())
            }
            _ => {
                self.fail(nest, ErrorCode::InvalidSyntax, "{} preceding no prior block");
                None
            }
        }
    }

    fn parse_digits(&mut self) -> Option<u32> {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return None;
        }
        std::str::from_utf8(&self.src[start..self.pos])
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
    }

    fn parse_repetition(&mut self, nest: usize) -> Option<Repetition> {
        self.pos += 1; // consume '{'
        let low = self.parse_digits();
        if self.peek() == Some(b',') {
            self.pos += 1;
            let high = self.parse_digits();
            if self.peek() != Some(b'}') {
                self.fail(
                    nest,
                    ErrorCode::InvalidSyntax,
                    "non-digit or extra comma in repetition",
                );
                return None;
            }
            self.pos += 1;
            let low_explicit = low.is_some();
            let high_explicit = high.is_some();
            let base = low.unwrap_or(0);
            let high = high.unwrap_or(65535);
            if base > u16::MAX as u32 || high > u16::MAX as u32 {
                self.fail(nest, ErrorCode::InvalidSyntax, "repetition bound exceeds 65535");
                return None;
            }
            // Normally low < high is required. The one exception is the
            // explicit `{0,0}` nullification idiom (spec.md's `(ab){0,0}cd`
            // scenario): both sides written out and both zero. A defaulted
            // zero (from `{,0}`) does not qualify — only literal `{0,0}`.
            let is_explicit_zero_zero = low_explicit && high_explicit && base == 0 && high == 0;
            if base >= high && !is_explicit_zero_zero {
                self.fail(nest, ErrorCode::InvalidSyntax, "repetition low must be < high");
                return None;
            }
            Some(Repetition::between(base as u16, high as u16))
        } else if self.peek() == Some(b'}') {
            self.pos += 1;
            match low {
                Some(n) if n <= u16::MAX as u32 => Some(Repetition::exactly(n as u16)),
                Some(_) => {
                    self.fail(nest, ErrorCode::InvalidSyntax, "repetition bound exceeds 65535");
                    None
                }
                None => {
                    self.fail(nest, ErrorCode::InvalidSyntax, "empty repetition");
                    None
                }
            }
        } else if self.eof() {
            self.fail(nest, ErrorCode::InvalidSyntax, "unclosed {");
            None
        } else {
            self.fail(
                nest,
                ErrorCode::InvalidSyntax,
                "non-digit or extra comma in repetition",
            );
            None
        }
    }

    fn parse_class(&mut self, nest: usize) -> Option<Block> {
        self.pos += 1; // consume '['
        let negate = if self.peek() == Some(b'^') {
            self.pos += 1;
            true
        } else {
            false
        };

        let mut fragments: Vec<RangeFragment> = Vec::new();
        loop {
            if self.eof() {
                self.fail(nest, ErrorCode::InvalidSyntax, "unclosed [");
                return None;
            }
            if self.peek() == Some(b']') {
                self.pos += 1;
                break;
            }
            let base = self.parse_class_token(nest)?;
            let frag = if self.peek() == Some(b'-') {
                self.pos += 1;
                let high = self.parse_class_token(nest)?;
                if high < base {
                    self.fail(nest, ErrorCode::InvalidSyntax, "invalid or empty range");
                    return None;
                }
                RangeFragment { base, high }
            } else {
                RangeFragment { base, high: base }
            };
            fragments.push(frag);
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                }
                Some(b']') => {}
                _ if self.eof() => {
                    self.fail(nest, ErrorCode::InvalidSyntax, "unclosed [");
                    return None;
                }
                _ => {
                    self.fail(nest, ErrorCode::InvalidSyntax, "expected ',' or ']' in class");
                    return None;
                }
            }
        }

        if fragments.is_empty() {
            self.fail(nest, ErrorCode::InvalidSyntax, "empty character class");
            return None;
        }
        if has_overlap(&fragments) {
            self.fail(nest, ErrorCode::InvalidSyntax, "overlapping class fragments");
            return None;
        }

        fragments.sort_by_key(|f| f.base);
        let final_fragments = if negate {
            complement(&fragments)
        } else {
            fragments
        };

        if final_fragments.is_empty() {
            self.fail(nest, ErrorCode::InvalidSyntax, "negated class excludes every byte");
            return None;
        }
        if final_fragments.len() > MAX_RANGE_FRAGMENTS {
            self.fail(nest, ErrorCode::InvalidSyntax, "too many range fragments");
            return None;
        }

        Some(Block::Range {
            fragments: final_fragments.into_boxed_slice(),
            count: Repetition::exactly(1),
        })
    }

    /// One token inside `[...]`: a literal byte, a letter escape, or a
    /// numeric escape (`\xHH`, `\dNNN`, `\oNNN`).
    fn parse_class_token(&mut self, nest: usize) -> Option<u8> {
        match self.peek() {
            None => {
                self.fail(nest, ErrorCode::InvalidSyntax, "unclosed [");
                None
            }
            Some(b'\\') => self.parse_escape(nest),
            Some(b) => {
                self.pos += 1;
                Some(b)
            }
        }
    }

    fn parse_numeric_escape(&mut self, nest: usize, radix: u32, max_digits: usize) -> Option<u8> {
        let start = self.pos;
        let mut count = 0;
        while count < max_digits
            && matches!(self.peek(), Some(b) if (b as char).is_digit(radix))
        {
            self.pos += 1;
            count += 1;
        }
        if count == 0 {
            self.fail(nest, ErrorCode::InvalidSyntax, "invalid numeric escape");
            return None;
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).ok()?;
        match u32::from_str_radix(text, radix) {
            Ok(v) if v <= 255 => Some(v as u8),
            _ => {
                self.fail(nest, ErrorCode::InvalidSyntax, "range outside [0,255]");
                None
            }
        }
    }

    fn parse_group(&mut self, nest: usize, seq: &mut Vec<Block>) -> Option<()> {
        self.pos += 1; // consume '('
        if nest + 1 > MAX_NEST {
            self.fail(nest, ErrorCode::TooMuchNesting, "nesting exceeds 5");
            return None;
        }
        let sub_idx = seq.len();
        seq.push(Block::Sub {
            count: Repetition::exactly(1),
        });
        let body = self.parse_alternation(nest + 1, &[b')'])?;
        if self.peek() != Some(b')') {
            self.fail(nest, ErrorCode::InvalidSyntax, "unclosed (");
            return None;
        }
        self.pos += 1; // consume ')'
        let back_count = body.len() as u32;
        seq.extend(body);
        seq.push(Block::Ret { back_count });

        self.apply_trailing_repetition(nest, seq)?;

        if self.peek() == Some(b'<') && self.peek_at(1) == Some(b'$') {
            self.parse_declaration(nest, seq, sub_idx)?;
        }
        Some(())
    }

    fn parse_declaration(&mut self, nest: usize, seq: &[Block], sub_idx: usize) -> Option<()> {
        self.pos += 2; // consume "<$"
        let label = self.parse_label_text(nest)?;
        if self.peek() != Some(b'>') {
            self.fail(nest, ErrorCode::InvalidSyntax, "unclosed <");
            return None;
        }
        self.pos += 1;

        if self.declared.contains(&label) {
            self.fail(nest, ErrorCode::InvalidSyntax, "label redeclaration");
            return None;
        }
        if self.subcontexts.len() >= MAX_SUBCONTEXTS {
            self.fail(nest, ErrorCode::InvalidSyntax, "too many subcontexts");
            return None;
        }

        let mut child_instructions: Vec<Block> = seq[sub_idx..].to_vec();
        child_instructions.push(Block::End);
        let max_output_size = estimate_max_size(&child_instructions);
        let child = Factory::new(child_instructions, self.subcontexts.clone(), max_output_size);

        self.subcontexts.push(SubcontextDecl {
            label,
            hash: label.djb2(),
            child: Arc::new(child),
        });
        self.declared.insert(label);
        Some(())
    }

    fn parse_label_text(&mut self, nest: usize) -> Option<Label> {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_uppercase()) {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).ok()?;
        match Label::parse(text) {
            Some(label) => Some(label),
            None => {
                self.fail(nest, ErrorCode::InvalidSyntax, "label length must be 1..=8");
                None
            }
        }
    }

    fn parse_angle(&mut self, nest: usize, seq: &mut Vec<Block>) -> Option<()> {
        let mode_char = self.peek_at(1);
        let mode = match mode_char {
            Some(b'@') => ReferenceMode::Paste,
            Some(b'#') => ReferenceMode::Length,
            Some(b'%') => ReferenceMode::Shuffle,
            Some(b'$') => {
                self.fail(
                    nest,
                    ErrorCode::InvalidSyntax,
                    "label declaration must follow a closed group",
                );
                return None;
            }
            _ => {
                self.fail(nest, ErrorCode::InvalidSyntax, "unrecognized '<' construct");
                return None;
            }
        };
        self.pos += 2; // consume "<@"/"<#"/"<%"
        let label = self.parse_label_text(nest)?;

        let lenopts = if matches!(mode, ReferenceMode::Length) {
            Some(self.parse_length_opts(nest)?)
        } else {
            None
        };

        if self.peek() != Some(b'>') {
            self.fail(nest, ErrorCode::InvalidSyntax, "unclosed <");
            return None;
        }
        self.pos += 1;

        if !self.declared.contains(&label) {
            self.fail(nest, ErrorCode::InvalidSyntax, "reference to undeclared label");
            return None;
        }

        seq.push(Block::Reference {
            label,
            mode,
            lenopts,
            count: Repetition::exactly(1),
        });
        self.apply_trailing_repetition(nest, seq)
    }

    /// Extended `<#LABEL:kind:width:add>` syntax. Bare `<#LABEL>` defaults to
    /// `Decimal`, width 0, add 0.
    fn parse_length_opts(&mut self, nest: usize) -> Option<LengthOpts> {
        if self.peek() != Some(b':') {
            return Some(LengthOpts {
                kind: LengthKind::Decimal,
                width: 0,
                add: 0,
            });
        }
        self.pos += 1;
        let kind = self.parse_length_kind(nest)?;

        let width = if self.peek() == Some(b':') {
            self.pos += 1;
            self.parse_digits().unwrap_or(0)
        } else {
            0
        };
        if width > u16::MAX as u32 {
            self.fail(nest, ErrorCode::InvalidSyntax, "length width exceeds 65535");
            return None;
        }

        let add = if self.peek() == Some(b':') {
            self.pos += 1;
            self.parse_signed()?
        } else {
            0
        };

        Some(LengthOpts {
            kind,
            width: width as u16,
            add,
        })
    }

    fn parse_length_kind(&mut self, nest: usize) -> Option<LengthKind> {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        let text = &self.src[start..self.pos];
        match text {
            b"little" => Some(LengthKind::RawLittle),
            b"big" => Some(LengthKind::RawBig),
            b"binary" => Some(LengthKind::Binary),
            b"decimal" => Some(LengthKind::Decimal),
            b"hex" => Some(LengthKind::Hexadecimal),
            b"HEX" => Some(LengthKind::HexUpper),
            b"octal" => Some(LengthKind::Octal),
            _ => {
                self.fail(nest, ErrorCode::InvalidSyntax, "unknown length-format kind");
                None
            }
        }
    }

    fn parse_signed(&mut self) -> Option<i64> {
        let negative = if self.peek() == Some(b'-') {
            self.pos += 1;
            true
        } else if self.peek() == Some(b'+') {
            self.pos += 1;
            false
        } else {
            false
        };
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).ok()?;
        let value: i64 = text.parse().ok()?;
        Some(if negative { -value } else { value })
    }
}

fn is_literal_stopper(b: u8) -> bool {
    matches!(b, b'[' | b'(' | b'<' | b'|' | b'{' | b'}' | b')' | b']' | b'>')
}

/// Letter-escape mapping, case-insensitive on the letter; anything else maps
/// to itself (`\c` → literal `c`).
fn escape_byte(c: u8) -> u8 {
    match c.to_ascii_lowercase() {
        b'b' => 0x08,
        b't' => 0x09,
        b'n' => 0x0A,
        b'v' => 0x0B,
        b'f' => 0x0C,
        b'r' => 0x0D,
        b'a' => 0x07,
        b's' => 0x20,
        _ => c,
    }
}

fn has_overlap(fragments: &[RangeFragment]) -> bool {
    for (i, a) in fragments.iter().enumerate() {
        for b in &fragments[i + 1..] {
            if a.base <= b.high && b.base <= a.high {
                return true;
            }
        }
    }
    false
}

fn complement(sorted_fragments: &[RangeFragment]) -> Vec<RangeFragment> {
    let mut out = Vec::new();
    let mut next_base: u16 = 0;
    for frag in sorted_fragments {
        if (frag.base as u16) > next_base {
            out.push(RangeFragment {
                base: next_base as u8,
                high: frag.base - 1,
            });
        }
        next_base = frag.high as u16 + 1;
    }
    if next_base <= 255 {
        out.push(RangeFragment {
            base: next_base as u8,
            high: 255,
        });
    }
    out
}

/// Best-effort upper bound on output bytes for one generation. Not
/// authoritative — the generator's pool-size check is. Reference-style
/// blocks are charged a flat estimate since their true size depends on the
/// (possibly not-yet-compiled) referenced subcontext.
fn estimate_max_size(instructions: &[Block]) -> usize {
    const REFERENCE_ESTIMATE: usize = 64;
    let mut total: usize = 0;
    for block in instructions {
        total = total.saturating_add(match block {
            Block::String { bytes, count } => bytes.len().saturating_mul(count.high as usize),
            Block::Range { count, .. } => (count.high as usize),
            Block::Reference { count, .. } => REFERENCE_ESTIMATE.saturating_mul(count.high as usize),
            Block::Sub { .. }
            | Block::Ret { .. }
            | Block::BranchRoot { .. }
            | Block::BranchJmp { .. }
            | Block::End => 0,
        });
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_ok(schema: &str) -> Factory {
        let (factory, errors) = compile(schema.as_bytes());
        assert!(errors.is_empty(), "unexpected errors for {schema:?}: {errors}");
        factory.unwrap_or_else(|| panic!("expected factory for {schema:?}"))
    }

    fn compile_err(schema: &str) {
        let (factory, errors) = compile(schema.as_bytes());
        assert!(factory.is_none(), "expected compile failure for {schema:?}");
        assert!(!errors.is_empty());
    }

    #[test]
    fn literal_only() {
        let factory = compile_ok("aaaaa");
        assert!(matches!(factory.instructions()[0], Block::String { .. }));
    }

    #[test]
    fn splits_literal_before_repetition() {
        let factory = compile_ok("abc{3}");
        // "ab" as one block, "c" repeated 3 times as another.
        match &factory.instructions()[0] {
            Block::String { bytes, .. } => assert_eq!(&**bytes, b"ab"),
            other => panic!("unexpected {other:?}"),
        }
        match &factory.instructions()[1] {
            Block::String { bytes, count } => {
                assert_eq!(&**bytes, b"c");
                assert_eq!(count.base, 3);
                assert!(count.single);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn escapes() {
        let factory = compile_ok(r"\r\n\x37\f\s");
        match &factory.instructions()[0] {
            Block::String { bytes, .. } => assert_eq!(&**bytes, &[0x0D, 0x0A, 0x37, 0x0C, 0x20]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn character_class() {
        let factory = compile_ok("[A-Z]{3}-[0-9]{4}");
        match &factory.instructions()[0] {
            Block::Range { fragments, count } => {
                assert_eq!(fragments.len(), 1);
                assert_eq!(fragments[0], RangeFragment { base: b'A', high: b'Z' });
                assert_eq!(count.base, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn negated_class_is_complement() {
        let factory = compile_ok("[^a]");
        match &factory.instructions()[0] {
            Block::Range { fragments, .. } => {
                assert_eq!(&**fragments, &[
                    RangeFragment { base: 0, high: b'a' - 1 },
                    RangeFragment { base: b'a' + 1, high: 255 },
                ]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn group_repetition() {
        let factory = compile_ok("(ab){2}");
        assert!(matches!(factory.instructions()[0], Block::Sub { count } if count.base == 2 && count.single));
    }

    #[test]
    fn zero_count_group_is_legal() {
        let factory = compile_ok("(ab){0,0}cd");
        assert!(matches!(factory.instructions()[0], Block::Sub { .. }));
    }

    #[test]
    fn ret_back_count_matches_sub_distance() {
        let factory = compile_ok("(ab){2}");
        let sub_idx = 0;
        let ret_idx = factory
            .instructions()
            .iter()
            .position(|b| matches!(b, Block::Ret { .. }))
            .unwrap();
        if let Block::Ret { back_count } = factory.instructions()[ret_idx] {
            assert_eq!(ret_idx as u32 - back_count, sub_idx as u32 + 1);
        }
    }

    #[test]
    fn nesting_five_ok_six_rejected() {
        compile_ok("(((((a)))))");
        compile_err("((((((a))))))");
    }

    #[test]
    fn label_length_boundaries() {
        compile_ok("(a)<$ABCDEFGH>");
        compile_err("(a)<$ABCDEFGHI>");
    }

    #[rstest::rstest]
    fn dead_schemas(
        #[values(
            "a(bcd",
            "a{3,bcd",
            "123[A-Z456",
            "a{,0}bcd",
            "a{3,a}bcd",
            "a)bcd",
            "a>bcd",
            "}abcd"
        )]
        schema: &str,
    ) {
        compile_err(schema);
    }

    #[test]
    fn repetition_boundaries() {
        compile_ok("a{65534,65535}");
        compile_err("a{65535,65535}");
    }

    #[test]
    fn reference_roundtrip() {
        let factory = compile_ok("(ab){2}<$X><@X><#X><%X>");
        assert_eq!(factory.subcontext_count(), 1);
    }

    #[test]
    fn undeclared_reference_fails() {
        compile_err("<@NOPE>");
    }

    #[test]
    fn empty_alternation_arm_fails() {
        compile_err("(a||b)");
    }

    #[test]
    fn alternation_compiles() {
        let factory = compile_ok("(cat|dog)");
        assert!(factory
            .instructions()
            .iter()
            .any(|b| matches!(b, Block::BranchRoot { .. })));
    }

    #[test]
    fn determinism_same_bytes() {
        let (a, _) = compile(b"a{1,3}bcd");
        let (b, _) = compile(b"a{1,3}bcd");
        let a = a.unwrap();
        let b = b.unwrap();
        assert_eq!(a.instructions().len(), b.instructions().len());
    }
}
