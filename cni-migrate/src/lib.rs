//! Command-line layer of the network policy converter.
//!
//! The conversion itself lives in `netpol-core`. This crate finds input
//! files, loads settings, lints Cilium manifests and renders results for a
//! terminal.
//!
//! - [`discover`]: policy files under an input path, grouped by dialect
//! - [`settings`]: TOML settings with an embedded default
//! - [`lint`]: structural checks on Cilium manifests
//! - [`inspect`]: text view of parsed policy documents
//! - [`report`]: colored terminal rendering

pub mod discover;
pub mod inspect;
pub mod lint;
pub mod report;
pub mod settings;
