//! # nanofuzz
//!
//! **nanofuzz** is a small pattern-schema driven fuzz data generator,
//! providing a hand-written compiler and bytecode interpreter under one
//! crate.
//!
//! ## Features
//!
//! - **Compact schema language:** literals, byte classes, repetition,
//!   nested groups, alternation, and named subcontexts compile to a flat
//!   instruction stream ahead of time.
//! - **Deterministic generation:** a seeded PRNG means the same schema and
//!   seed always produce the same stream of values.
//!
//! ## Usage
//!
//! ```rust
//! use nanofuzz::Fuzzer;
//!
//! let mut fuzzer = Fuzzer::new(b"[A-Z]{3}-[0-9]{4}", 42, 1024).unwrap();
//! let value = fuzzer.next().unwrap();
//! assert_eq!(value.len(), 8);
//! ```
//!
//! ## Crate Organization
//!
//! - [`pattern`] — schema data model, compiler, and compiled `Factory`
//! - [`generator`] — the bytecode interpreter
//! - [`context`] — the public `Fuzzer` façade
//! - [`prefetch`] — optional background generation
//! - [`prng`] — the PRNG the generator draws from
//! - [`error`] — error taxonomies
//!
//! ## License
//!
//! Licensed under MIT or Apache-2.0.

pub mod context;
pub mod error;
pub mod generator;
pub mod pattern;
pub mod prefetch;
pub mod prng;

pub use context::Fuzzer;
pub use error::{GenerationError, NanofuzzError};
