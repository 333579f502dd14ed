//
// lib.rs
// dcmsort
//
// Exposes the crate's modules and re-exports the CLI entry point for both binary and library consumers.
//

// Public surface of the library: each module covers one stage of the pipeline
// or a shared utility.
pub mod archive;
pub mod cli;
pub mod config;
pub mod logging;
pub mod progress;
pub mod record;
pub mod report;
pub mod rle;
pub mod scan;
pub mod scu;
pub mod send;
pub mod sort;
pub mod transcode;

pub use cli::{run, Cli};
