//! # Random access over compressed text
//!
//! `gralz` answers `at(i)` and `substr(i, ℓ)` queries against a text that is
//! only ever held in compressed form, for two compression models:
//!
//! - **Straight-line grammars**: a context-free grammar with one production
//!   per nonterminal deriving exactly the text. [`queries::NaiveGrammar`]
//!   walks the derivation guided by precomputed expansion lengths;
//!   [`queries::SampledScanGrammar`] additionally resumes the walk from
//!   text-position samples taken every Δ characters, with the standard
//!   presets Δ ∈ {512, 6400, 25600}.
//! - **LZ-End parses**: the Lempel-Ziv variant of Kreft and Navarro in which
//!   every phrase's source ends at a previous phrase boundary.
//!   [`queries::LzEnd`] follows back-references through a succinct index of
//!   sparse bit vectors and a shortcut-augmented permutation.
//!
//! Both models are loaded from their bit-packed on-disk formats through
//! [`bit_stream::BitReader`]; the decoded indexes are immutable and safe to
//! query from multiple threads.
//!
//! The underlying building blocks are exposed as modules of their own:
//! plain, dense-indexed, and Elias-Fano bit vectors in [`bit_vectors`],
//! packed integer arrays in [`int_vectors`], and invertible permutations in
//! [`permutation`].
#![deny(missing_docs)]
#![cfg(target_pointer_width = "64")]

pub mod bit_stream;
pub mod bit_vectors;
pub mod broadword;
pub mod grammar;
pub mod int_vectors;
pub mod permutation;
pub mod queries;
pub mod serial;
pub mod utils;

pub use serial::Serializable;
