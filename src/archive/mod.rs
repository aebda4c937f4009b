//! Archive content analyzers
//!
//! Structural analysis of RAR and 7z sets delivered as segment manifests:
//! volume naming and ordering ([`volumes`]), progressive RAR scanning
//! ([`rar`]), and 7z header parsing with byte-offset computation
//! ([`sevenz`]). Analyzers read volume bytes through
//! [`crate::segments::VolumeSet`] and never materialize archive data.

pub mod rar;
pub mod sevenz;
pub mod volumes;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use rar::{RarAnalyzer, RarEntry};
pub use sevenz::{SevenZipAnalyzer, SevenZipArchiveInfo, SevenZipEntry};
