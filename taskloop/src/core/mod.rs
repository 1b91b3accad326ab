//! Deterministic, pure logic shared by the pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on task
//! documents and plain values and return deterministic outputs suitable for
//! tests: classification, gating, step parsing, queue rules and note text.

pub mod approval;
pub mod cycle;
pub mod document;
pub mod keywords;
pub mod notes;
pub mod risk;
pub mod steps;
pub mod transitions;
pub mod types;
