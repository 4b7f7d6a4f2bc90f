//! mediaforge: batch media conversion on top of the mf-* crates.
//!
//! The heavy lifting lives in the workspace crates; this library adds the
//! batch runner the CLI drives and the console formatting it prints with.

pub mod batch;
pub mod report;
