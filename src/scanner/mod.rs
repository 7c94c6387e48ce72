//! Media discovery: directory walking, metadata extraction and hashing.

pub mod file_scanner;
pub mod hash;
pub mod metadata;

pub use file_scanner::{FileScanner, ScanConfig, ScanEvent, ScanState};
