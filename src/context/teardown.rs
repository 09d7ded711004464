//! Collected outcome of an ordered teardown.

use std::fmt;

use crate::error::HarnessError;

/// One teardown step that failed.
#[derive(Debug)]
pub struct TeardownFailure {
    /// What was being released (for example `pa1/gateway`).
    pub step: String,
    /// Why it failed.
    pub error: HarnessError,
}

/// Errors collected while unwinding a context.
///
/// Teardown never stops part-way: every release is attempted and the
/// failures end up here instead of aborting the unwind.
#[derive(Debug, Default)]
#[must_use = "teardown failures are only reported through the report"]
pub struct TeardownReport {
    failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    /// An empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of one step, logging failures.
    pub fn record(&mut self, step: impl Into<String>, outcome: Result<(), HarnessError>) {
        if let Err(error) = outcome {
            self.push(step.into(), error);
        }
    }

    /// Records several failures of one step.
    pub fn record_all(&mut self, step: &str, errors: impl IntoIterator<Item = HarnessError>) {
        for error in errors {
            self.push(step.to_string(), error);
        }
    }

    fn push(&mut self, step: String, error: HarnessError) {
        tracing::warn!(%step, error = %error, "teardown step failed");
        self.failures.push(TeardownFailure { step, error });
    }

    /// Appends another report.
    pub fn merge(&mut self, other: Self) {
        self.failures.extend(other.failures);
    }

    /// Returns `true` if every step succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// The failed steps, in the order they ran.
    #[must_use]
    pub fn failures(&self) -> &[TeardownFailure] {
        &self.failures
    }

    /// Consumes the report, keeping only the errors.
    #[must_use]
    pub fn into_errors(self) -> Vec<HarnessError> {
        self.failures.into_iter().map(|f| f.error).collect()
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return f.write_str("clean teardown");
        }
        write!(f, "{} teardown step(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.step, failure.error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_only_failures() {
        let mut report = TeardownReport::new();
        report.record("gateway", Ok(()));
        report.record("runner", Err(HarnessError::Handler("x".to_string())));
        assert!(!report.is_clean());
        assert_eq!(report.failures().len(), 1);

        let mut outer = TeardownReport::new();
        outer.record_all("pool", vec![HarnessError::ConnectionClosed]);
        outer.merge(report);
        assert_eq!(outer.failures().len(), 2);
        assert!(outer.to_string().starts_with("2 teardown step(s) failed"));
        assert_eq!(outer.into_errors().len(), 2);
        assert_eq!(TeardownReport::new().to_string(), "clean teardown");
    }
}
