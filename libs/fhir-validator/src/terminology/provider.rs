/// Result of a code lookup.
///
/// `found` is false when the value set or code system is unknown to the
/// provider; the binding phase treats that as non-fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeLookup {
    pub valid: bool,
    pub found: bool,
}

impl CodeLookup {
    pub const UNKNOWN: Self = Self {
        valid: false,
        found: false,
    };

    pub fn known(valid: bool) -> Self {
        Self { valid, found: true }
    }
}

/// Provides terminology answers to the binding phase.
///
/// Implementations range from in-memory (package-backed) to remote
/// terminology servers. All operations are infallible lookups; a
/// provider that cannot answer returns `found = false` rather than an
/// error.
pub trait TerminologyProvider: Send + Sync {
    /// Is `(system, code)` a member of the value set?
    fn validate_code(&self, value_set_url: &str, system: &str, code: &str) -> CodeLookup;

    /// Does the code system define this code?
    fn validate_code_in_system(&self, system: &str, code: &str) -> CodeLookup;

    /// The display the code system declares for a code, if known.
    fn display_for_code(&self, system: &str, code: &str) -> Option<String>;

    /// Does the value set enumerate any codes from this system?
    fn is_system_in_value_set(&self, value_set_url: &str, system: &str) -> bool;

    /// Does this code system require a networked terminology server?
    /// Used for informational routing only.
    fn is_external_system(&self, system: &str) -> bool;
}
