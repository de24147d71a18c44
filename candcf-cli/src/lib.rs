//! Shared pieces of the candcf command line tools

pub mod render;

use candcf_core::diag::Diagnostics;

/// Print every collected warning to stderr
///
/// Diagnostics also go through the `log` facade as they are recorded; this is
/// the always-on channel for interactive use.
pub fn report_warnings(diag: &Diagnostics) {
    for warning in diag.warnings() {
        eprintln!("warning: {}", warning.message);
    }
}
