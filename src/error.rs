//! Error taxonomies: the bounded in-band [`ErrorTrace`] the compiler fills in,
//! and the public [`NanofuzzError`]/[`GenerationError`] surface the façade
//! returns from fallible operations.

use std::fmt;

/// Maximum number of fragments an [`ErrorTrace`] will retain.
pub const MAX_FRAGMENTS: usize = 16;
/// Maximum byte length of a single fragment's rendered text.
pub const MAX_FRAGMENT_TEXT: usize = 512;

/// A compile-error kind, attached to each [`ErrorFragment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidSyntax,
    TooMuchNesting,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::InvalidSyntax => write!(f, "InvalidSyntax"),
            ErrorCode::TooMuchNesting => write!(f, "TooMuchNesting"),
        }
    }
}

/// One diagnostic fragment: the nest level and byte offset the compiler was
/// at when it gave up on the current arm, plus a short explanation.
#[derive(Debug, Clone)]
pub struct ErrorFragment {
    code: ErrorCode,
    nest: usize,
    offset: usize,
    text: String,
}

impl ErrorFragment {
    fn rendered(&self) -> String {
        format!(
            "[Err {}] [Nest {}] [Index {}] {}",
            self.code, self.nest, self.offset, self.text
        )
    }
}

/// A bounded, ordered sequence of diagnostic fragments produced while
/// compiling a schema. Capped at [`MAX_FRAGMENTS`]; further pushes are
/// silently dropped so a pathological schema can't unbound memory use while
/// reporting errors about itself.
#[derive(Debug, Clone, Default)]
pub struct ErrorTrace {
    fragments: Vec<ErrorFragment>,
}

impl ErrorTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one fragment. Text longer than [`MAX_FRAGMENT_TEXT`] is
    /// truncated; pushes past [`MAX_FRAGMENTS`] are dropped.
    pub fn add(&mut self, nest: usize, offset: usize, code: ErrorCode, text: impl Into<String>) {
        if self.fragments.len() >= MAX_FRAGMENTS {
            return;
        }
        let mut text = text.into();
        if text.len() > MAX_FRAGMENT_TEXT {
            text.truncate(MAX_FRAGMENT_TEXT);
        }
        self.fragments.push(ErrorFragment {
            code,
            nest,
            offset,
            text,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Write all fragments to `sink`, most-recently-added first.
    pub fn print(&self, sink: &mut impl fmt::Write) -> fmt::Result {
        for fragment in self.fragments.iter().rev() {
            writeln!(sink, "{}", fragment.rendered())?;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.fragments.clear();
    }
}

impl fmt::Display for ErrorTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, fragment) in self.fragments.iter().rev().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", fragment.rendered())?;
        }
        Ok(())
    }
}

/// Runtime generation failure. Non-fatal: the generator resets its internal
/// state and is ready for the next call after any of these.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationError {
    #[error("output would exceed the configured pool size")]
    PoolExceeded,
    #[error("reference to unknown subcontext")]
    MissingSubcontext,
    #[error("reference uses an unrecognized length-format kind")]
    UnknownLengthKind,
    #[error("length-format width/kind combination is not representable")]
    MalformedLengthWidth,
}

/// Top-level error returned by the public façade.
#[derive(thiserror::Error, Debug)]
pub enum NanofuzzError {
    #[error("schema failed to compile:\n{0}")]
    Compile(ErrorTrace),

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("I/O error while streaming output: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_at_sixteen_fragments() {
        let mut trace = ErrorTrace::new();
        for i in 0..32 {
            trace.add(0, i, ErrorCode::InvalidSyntax, "x");
        }
        assert_eq!(trace.len(), MAX_FRAGMENTS);
    }

    #[test]
    fn prints_most_recent_first() {
        let mut trace = ErrorTrace::new();
        trace.add(0, 1, ErrorCode::InvalidSyntax, "first");
        trace.add(0, 2, ErrorCode::InvalidSyntax, "second");
        let mut out = String::new();
        trace.print(&mut out).unwrap();
        let first_line = out.lines().next().unwrap();
        assert!(first_line.contains("second"));
    }

    #[test]
    fn truncates_overlong_text() {
        let mut trace = ErrorTrace::new();
        let huge = "a".repeat(MAX_FRAGMENT_TEXT + 100);
        trace.add(0, 0, ErrorCode::InvalidSyntax, huge);
        let mut out = String::new();
        trace.print(&mut out).unwrap();
        assert!(out.len() < MAX_FRAGMENT_TEXT + 100);
    }
}
