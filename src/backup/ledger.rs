//! Error and warning bookkeeping for one backup run.
//!
//! Every method records what went wrong against its own name. When a
//! method's output is thrown away in favour of the next fallback, its errors
//! are demoted to warnings: the history is kept, but a run rescued by a
//! fallback is not reported as failed.

use crate::backup::result_error::error::Error;
use derive_more::Display;
use getset::{CopyGetters, Getters};
use std::collections::BTreeMap;
use std::fmt::Formatter;

/// A stage of the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum Stage {
    #[display("database dump")]
    Dump,
    #[display("archive")]
    Archive,
}

/// A concrete strategy for a stage, in fallback order within each stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub enum Method {
    #[display("external-dump")]
    ExternalDump,
    #[display("fallback-dump")]
    FallbackDump,
    #[display("shell-archiver")]
    ShellArchiver,
    #[display("zip-writer")]
    ZipWriter,
    #[display("zip-tree")]
    ZipTree,
}

impl Method {
    pub fn stage(self) -> Stage {
        match self {
            Method::ExternalDump | Method::FallbackDump => Stage::Dump,
            Method::ShellArchiver | Method::ZipWriter | Method::ZipTree => Stage::Archive,
        }
    }

    /// The method tried after this one, if any.
    pub fn fallback(self) -> Option<Method> {
        match self {
            Method::ExternalDump => Some(Method::FallbackDump),
            Method::ShellArchiver => Some(Method::ZipWriter),
            Method::ZipWriter => Some(Method::ZipTree),
            Method::FallbackDump | Method::ZipTree => None,
        }
    }
}

/// Outcome of a method attempt or of a whole stage.
#[derive(Debug)]
pub enum StageOutcome {
    /// The artifact was produced and verified.
    Success(Method),
    /// The method failed and a fallback remains.
    Recoverable(Error),
    /// Nothing left to try.
    Fatal(Error),
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success(_))
    }
}

#[derive(Debug, Default, Getters, CopyGetters)]
pub struct RunLedger {
    #[getset(get = "pub")]
    errors: BTreeMap<Method, Vec<String>>,
    #[getset(get = "pub")]
    warnings: BTreeMap<Method, Vec<String>>,
    #[getset(get_copy = "pub")]
    archive_method: Option<Method>,
    #[getset(get_copy = "pub")]
    dump_method: Option<Method>,
    #[getset(get_copy = "pub")]
    archive_verified: bool,
    #[getset(get_copy = "pub")]
    dump_verified: bool,
}

fn insert_unique(map: &mut BTreeMap<Method, Vec<String>>, method: Method, payload: String) -> bool {
    let entries = map.entry(method).or_default();
    if entries.contains(&payload) {
        false
    } else {
        entries.push(payload);
        true
    }
}

impl RunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an error against `method`. Identical payloads are kept once.
    pub fn error<D: std::fmt::Display>(&mut self, method: Method, error: D) {
        let payload = error.to_string();
        if insert_unique(&mut self.errors, method, payload.clone()) {
            tracing::error!("[{method}] {payload}");
        }
    }

    /// Records a warning against `method`. Identical payloads are kept once.
    pub fn warning<D: std::fmt::Display>(&mut self, method: Method, warning: D) {
        let payload = warning.to_string();
        if insert_unique(&mut self.warnings, method, payload.clone()) {
            tracing::warn!("[{method}] {payload}");
        }
    }

    pub fn errors_for(&self, method: Method) -> &[String] {
        self.errors.get(&method).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn warnings_for(&self, method: Method) -> &[String] {
        self.warnings.get(&method).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn has_errors_for(&self, method: Method) -> bool {
        !self.errors_for(method).is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.errors.values().any(|e| !e.is_empty())
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.values().map(Vec::len).sum()
    }

    /// Moves every error of `method` to its warnings.
    pub fn demote_errors(&mut self, method: Method) {
        if let Some(errors) = self.errors.remove(&method) {
            if !errors.is_empty() {
                tracing::debug!(
                    "Demoting {} error(s) of {method} to warnings",
                    errors.len()
                );
            }
            for error in errors {
                insert_unique(&mut self.warnings, method, error);
            }
        }
    }

    /// Switches the stage of `method` over to it.
    pub fn begin(&mut self, method: Method) {
        match method.stage() {
            Stage::Dump => self.dump_method = Some(method),
            Stage::Archive => self.archive_method = Some(method),
        }
        tracing::info!("Trying {} with {method}", method.stage());
    }

    pub fn mark_verified(&mut self, method: Method) {
        match method.stage() {
            Stage::Dump => {
                self.dump_method = Some(method);
                self.dump_verified = true;
            }
            Stage::Archive => {
                self.archive_method = Some(method);
                self.archive_verified = true;
            }
        }
        tracing::info!("Verified {} created by {method}", method.stage());
    }

    /// True when the archive was verified and no error remains unresolved.
    pub fn succeeded(&self) -> bool {
        self.archive_verified && !self.has_errors()
    }
}

impl std::fmt::Display for RunLedger {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let status = if self.succeeded() { "succeeded" } else { "failed" };
        writeln!(f, "Backup {status}")?;
        if let Some(method) = self.dump_method {
            writeln!(f, "  database dump: {method} (verified: {})", self.dump_verified)?;
        }
        if let Some(method) = self.archive_method {
            writeln!(f, "  archive: {method} (verified: {})", self.archive_verified)?;
        }
        for (label, map) in [("error", &self.errors), ("warning", &self.warnings)] {
            for (method, payloads) in map {
                for payload in payloads {
                    writeln!(
                        f,
                        "  {label} [{method}]: {}",
                        indent::indent_by(4, payload.as_str())
                    )?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_order() {
        assert_eq!(Method::ExternalDump.fallback(), Some(Method::FallbackDump));
        assert_eq!(Method::FallbackDump.fallback(), None);
        assert_eq!(Method::ShellArchiver.fallback(), Some(Method::ZipWriter));
        assert_eq!(Method::ZipWriter.fallback(), Some(Method::ZipTree));
        assert_eq!(Method::ZipTree.fallback(), None);
        assert_eq!(Method::ZipTree.to_string(), "zip-tree");
        assert_eq!(Method::ExternalDump.stage(), Stage::Dump);
    }

    #[test]
    fn test_deduplicates_payloads() {
        let mut ledger = RunLedger::new();
        ledger.error(Method::ShellArchiver, "zip error: Nothing to do!");
        ledger.error(Method::ShellArchiver, "zip error: Nothing to do!");
        ledger.warning(Method::ShellArchiver, "could not open");
        ledger.warning(Method::ShellArchiver, "could not open");

        assert_eq!(ledger.errors_for(Method::ShellArchiver).len(), 1);
        assert_eq!(ledger.warnings_for(Method::ShellArchiver).len(), 1);
    }

    #[test]
    fn test_demote_errors_keeps_history() {
        let mut ledger = RunLedger::new();
        ledger.error(Method::ExternalDump, "Access denied for user");
        ledger.warning(Method::ExternalDump, "Access denied for user");
        assert!(ledger.has_errors());

        ledger.demote_errors(Method::ExternalDump);

        assert!(!ledger.has_errors());
        assert_eq!(
            ledger.warnings_for(Method::ExternalDump),
            ["Access denied for user".to_owned()]
        );
    }

    #[test]
    fn test_succeeded_requires_verified_archive() {
        let mut ledger = RunLedger::new();
        assert!(!ledger.succeeded());

        ledger.begin(Method::ZipWriter);
        ledger.mark_verified(Method::ZipWriter);
        assert!(ledger.succeeded());
        assert_eq!(ledger.archive_method(), Some(Method::ZipWriter));

        ledger.error(Method::ZipWriter, "late failure");
        assert!(!ledger.succeeded());
        assert!(ledger.to_string().contains("error [zip-writer]: late failure"));
    }
}
