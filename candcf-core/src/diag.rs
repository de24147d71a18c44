//! Diagnostic sink for non-fatal findings
//!
//! The linter and the configurators report problems that do not abort the run
//! as [Warning]s. Each warning carries a nesting depth hint, which mirrors the
//! call depth at which the finding was produced and is purely informational.

/// A single non-fatal finding
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Warning {
    /// Human readable description of the finding
    pub message: String,
    /// Nesting depth at which the finding was produced
    pub depth: u8,
}

/// Collects warnings produced while processing a DCF or a network config
///
/// Warnings are mirrored to the `log` facade as they are recorded, so callers
/// that only care about the log output can pass a sink and drop it.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning with the given nesting depth hint
    pub fn warn(&mut self, depth: u8, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{}", message);
        self.warnings.push(Warning { message, depth });
    }

    /// All warnings recorded so far, in order
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    /// True if any recorded warning contains the given fragment
    pub fn any_contains(&self, fragment: &str) -> bool {
        self.warnings.iter().any(|w| w.message.contains(fragment))
    }
}
