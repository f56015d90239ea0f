pub mod enumerate;
pub mod shell;
pub mod zip_tree;
pub mod zip_writer;

use crate::backup::archive::enumerate::{
    is_readable, EntryKind, Enumeration, FileEnumerator, ReadableCheck,
};
use crate::backup::exclude::ExcludeMatcher;
use crate::backup::ledger::{Method, RunLedger, StageOutcome};
use crate::backup::path;
use crate::backup::probe::ToolCapability;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;

use bon::Builder;
use getset::{CopyGetters, Getters};
use zip::ZipArchive;

use std::fs::File;
use std::path::{Path, PathBuf};

/// The archive stage of a run.
///
/// Tries the external `zip` binary, then [`zip_writer`], then [`zip_tree`].
/// Each method starts from a clean slate: a method whose archive fails
/// verification has it deleted and its errors demoted to warnings before the
/// next one runs. The database dump is removed when the stage ends, whatever
/// the outcome.
#[derive(Debug, Builder, Getters, CopyGetters)]
pub struct Archiver {
    #[builder(into)]
    #[getset(get = "pub")]
    root: PathBuf,
    #[builder(into)]
    #[getset(get = "pub")]
    destination: PathBuf,
    #[builder(into)]
    #[getset(get = "pub")]
    archive_filepath: PathBuf,
    /// Set only when a verified dump is waiting to be added.
    dump_filepath: Option<PathBuf>,
    #[builder(default = true)]
    #[getset(get_copy = "pub")]
    include_files: bool,
    #[builder(default)]
    excludes: Vec<String>,
    #[builder(default = ToolCapability::Unavailable)]
    #[getset(get = "pub")]
    shell_tool: ToolCapability,
    #[builder(default = is_readable as ReadableCheck)]
    readable: ReadableCheck,
}

impl Archiver {
    pub fn dump_filepath(&self) -> Option<&Path> {
        self.dump_filepath.as_deref()
    }

    /// The dump's bare file name, which is also its name inside the archive.
    pub fn dump_filename(&self) -> Option<String> {
        self.dump_filepath()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
    }

    pub fn excludes(&self) -> &[String] {
        &self.excludes
    }

    /// Files the walk must never pick up.
    pub fn artifacts(&self) -> Vec<PathBuf> {
        std::iter::once(self.archive_filepath.clone())
            .chain(self.dump_filepath.clone())
            .collect()
    }

    /// Whether the in-process methods can open `path` for archiving.
    pub fn is_readable(&self, path: &Path, kind: EntryKind) -> bool {
        (self.readable)(path, kind)
    }

    pub fn exclude_matcher(&self) -> Result<ExcludeMatcher> {
        ExcludeMatcher::regex(&self.excludes, &path::normalize_path(&self.root))
    }

    pub fn enumerate(&self) -> Result<Enumeration> {
        let matcher = self.exclude_matcher()?;
        FileEnumerator::builder()
            .root(self.root.clone())
            .matcher(&matcher)
            .skip(self.artifacts())
            .readable(self.readable)
            .build()
            .enumerate()
    }

    fn first_method(&self) -> Method {
        if self.include_files && self.shell_tool.is_available() {
            Method::ShellArchiver
        } else {
            Method::ZipWriter
        }
    }

    pub fn run(&self, ledger: &mut RunLedger) -> StageOutcome {
        let mut method = self.first_method();
        let outcome = loop {
            match self.attempt(method, ledger) {
                StageOutcome::Recoverable(e) => match method.fallback() {
                    Some(next) => {
                        tracing::info!("{method} failed, falling back to {next}");
                        tracing::debug!("{method} failure: {e}");
                        ledger.demote_errors(method);
                        method = next;
                    }
                    None => break StageOutcome::Fatal(e),
                },
                outcome => break outcome,
            }
        };

        if let StageOutcome::Fatal(e) = &outcome {
            tracing::error!("Archiving {:?} failed: {e}", self.root);
        }
        self.remove_dump();
        outcome
    }

    /// Runs one method and verifies what it left behind.
    pub fn attempt(&self, method: Method, ledger: &mut RunLedger) -> StageOutcome {
        ledger.begin(method);
        self.discard_archive();

        let failure = self.write(method, ledger).err();
        if let Some(e) = &failure {
            ledger.error(method, e);
        }

        if self.verify(method, ledger) {
            ledger.mark_verified(method);
            return StageOutcome::Success(method);
        }

        let error = failure.unwrap_or_else(|| {
            let unverified = Error::Unverified {
                method,
                path: self.archive_filepath.clone(),
            };
            ledger.error(method, &unverified);
            unverified
        });
        match method.fallback() {
            Some(_) => StageOutcome::Recoverable(error),
            None => StageOutcome::Fatal(error),
        }
    }

    fn write(&self, method: Method, ledger: &mut RunLedger) -> Result<()> {
        match method {
            Method::ShellArchiver => match self.shell_tool.path() {
                Some(tool) => shell::create(self, tool, ledger),
                None => Err(Error::config("no external zip binary available")),
            },
            Method::ZipWriter => zip_writer::create(self, ledger),
            Method::ZipTree => zip_tree::create(self, ledger),
            other => Err(Error::config(format!("{other} is not an archive method"))),
        }
    }

    /// An archive passes when it exists, its method recorded no error, it
    /// opens as a zip with at least one entry, the dump (when there is one)
    /// is among those entries and, for the external binary, `zip -T` reports
    /// it OK. A failing archive is deleted.
    pub fn verify(&self, method: Method, ledger: &mut RunLedger) -> bool {
        if !self.archive_filepath.exists() {
            tracing::debug!("{method} left no archive at {:?}", self.archive_filepath);
            return false;
        }
        if ledger.has_errors_for(method) {
            self.discard_archive();
            return false;
        }

        let integrity = match (method, self.shell_tool.path()) {
            (Method::ShellArchiver, Some(tool)) => {
                shell::test_integrity(tool, &self.archive_filepath)
            }
            _ => Ok(()),
        };
        let dump_entry = self.dump_filename();
        let structure =
            integrity.and_then(|_| check_structure(&self.archive_filepath, dump_entry.as_deref()));
        if let Err(e) = structure {
            ledger.error(method, e);
            self.discard_archive();
            return false;
        }
        true
    }

    fn discard_archive(&self) {
        if self.archive_filepath.exists() {
            tracing::debug!("Deleting archive {:?}", self.archive_filepath);
            if let Err(e) = std::fs::remove_file(&self.archive_filepath) {
                tracing::warn!("Cannot delete {:?}: {e}", self.archive_filepath);
            }
        }
    }

    fn remove_dump(&self) {
        if let Some(dump) = self.dump_filepath().filter(|d| d.exists()) {
            tracing::debug!("Deleting database dump {dump:?}");
            if let Err(e) = std::fs::remove_file(dump) {
                tracing::warn!("Cannot delete {dump:?}: {e}");
            }
        }
    }
}

/// The archive opens as a zip, holds at least one entry and, when given,
/// holds `dump_entry` at its top level.
pub fn check_structure(archive: &Path, dump_entry: Option<&str>) -> Result<()> {
    let mut zip = ZipArchive::new(File::open(archive)?)?;
    if zip.is_empty() {
        return Err(Error::NothingToArchive);
    }
    if let Some(name) = dump_entry {
        zip.by_name(name)
            .map_err(Error::from)
            .with_msg(format!("Database dump {name} is missing from {archive:?}"))?;
    }
    Ok(())
}
