//! Baseline gating for the build/test layer (§4.7): a preexisting failure
//! set captured at session start is tolerated, so only new or worsened
//! failures fail a task.

use std::collections::HashSet;

/// The set of test names already failing before the session started.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Baseline {
    failing: HashSet<String>,
}

impl Baseline {
    /// No preexisting failures tolerated — any failure is new.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Capture a baseline from one run of the test command's output.
    #[must_use]
    pub fn capture(test_output: &str) -> Self {
        Self {
            failing: parse_failing_tests(test_output),
        }
    }

    /// Rebuild a baseline from a previously persisted failing-test set
    /// (the CLI's `.alphie/baseline.json`, §6).
    #[must_use]
    pub fn from_failing_tests(failing: HashSet<String>) -> Self {
        Self { failing }
    }

    /// The captured failing-test identifiers.
    #[must_use]
    pub const fn failing_tests(&self) -> &HashSet<String> {
        &self.failing
    }

    /// Whether `current` contains any failure not already in this baseline
    /// (§4.7, §8 invariant 8: a PASS implies the current failing set is a
    /// subset of the baseline's).
    #[must_use]
    pub fn has_new_failures(&self, current: &HashSet<String>) -> bool {
        !current.is_subset(&self.failing)
    }
}

/// Parse failing test identifiers out of ecosystem-agnostic test runner
/// output. Recognizes the common "test NAME ... FAILED" / "FAIL NAME"
/// conventions shared by `cargo test`, `go test`, and most JS test runners,
/// rather than any one ecosystem's exact format.
#[must_use]
pub(super) fn parse_failing_tests(output: &str) -> HashSet<String> {
    let mut failing = HashSet::new();
    for line in output.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("test ") {
            if let Some((name, outcome)) = rest.rsplit_once("...") {
                if outcome.trim() == "FAILED" {
                    failing.insert(name.trim().to_owned());
                }
            }
        } else if let Some(rest) = trimmed.strip_prefix("FAIL ") {
            failing.insert(rest.trim().to_owned());
        } else if let Some(rest) = trimmed.strip_prefix("✗ ") {
            failing.insert(rest.trim().to_owned());
        }
    }
    failing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cargo_style_failures() {
        let output = "test foo::bar ... ok\ntest foo::baz ... FAILED\n";
        let failing = parse_failing_tests(output);
        assert_eq!(failing.len(), 1);
        assert!(failing.contains("foo::baz"));
    }

    #[test]
    fn parses_go_style_failures() {
        let output = "--- FAIL: TestThing\nFAIL TestThing\n";
        let failing = parse_failing_tests(output);
        assert!(failing.contains("TestThing"));
    }

    #[test]
    fn baseline_tolerates_captured_failures() {
        let baseline = Baseline::capture("test a ... FAILED\ntest b ... ok\n");
        assert!(baseline.failing_tests().contains("a"));
        assert!(!baseline.failing_tests().contains("b"));
    }

    #[test]
    fn empty_baseline_tolerates_nothing() {
        assert!(Baseline::empty().failing_tests().is_empty());
    }

    #[test]
    fn has_new_failures_only_when_current_exceeds_baseline() {
        let baseline = Baseline::from_failing_tests(["a".to_owned(), "b".to_owned()].into());
        assert!(!baseline.has_new_failures(&["a".to_owned()].into()));
        assert!(!baseline.has_new_failures(&["a".to_owned(), "b".to_owned()].into()));
        assert!(baseline.has_new_failures(&["a".to_owned(), "c".to_owned()].into()));
    }
}
