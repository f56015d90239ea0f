//! The external `zip` binary.

use crate::backup::archive::Archiver;
use crate::backup::exclude::{compile, TargetSyntax};
use crate::backup::ledger::{Method, RunLedger};
use crate::backup::path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;

use std::path::Path;
use std::process::{Command, Output};

/// `zip` exit status for "nothing to do".
pub const NOTHING_TO_DO: i32 = 12;

/// Marker printed by `zip -T` for an archive that tested fine.
pub const INTEGRITY_MARKER: &str = "OK";

/// Zips the root recursively from inside it, then appends the database dump
/// from the destination directory.
///
/// Diagnostics printed by `zip` are recorded as warnings; whether the
/// archive is usable is left to verification.
pub fn create(archiver: &Archiver, tool: &Path, ledger: &mut RunLedger) -> Result<()> {
    let root = path::normalize_path(archiver.root());
    let expression = compile(archiver.excludes(), &root, TargetSyntax::ShellGlob);
    if expression.is_empty() {
        tracing::debug!("{} -rq {:?} ./", tool.display(), archiver.archive_filepath());
    } else {
        tracing::debug!(
            "{} -rq {:?} ./ -x {expression}",
            tool.display(),
            archiver.archive_filepath()
        );
    }

    let output = Command::new(tool)
        .current_dir(archiver.root())
        .arg("-rq")
        .arg(archiver.archive_filepath())
        .arg("./")
        .args(expression.zip_args())
        .output()
        .map_err(Error::from)
        .with_msg(format!("Running {} failed", tool.display()))?;
    record_diagnostics(tool, &output, ledger);

    if output.status.code() == Some(NOTHING_TO_DO) {
        if archiver.dump_filepath().is_none() {
            return Err(Error::NothingToArchive);
        }
        ledger.warning(Method::ShellArchiver, "No files left to archive after excludes");
    } else if !output.status.success() {
        ledger.warning(Method::ShellArchiver, tool_failed(tool, &output));
    }

    if let Some(dump) = archiver.dump_filepath() {
        append_dump(archiver, tool, dump, ledger)?;
    }

    Ok(())
}

fn append_dump(archiver: &Archiver, tool: &Path, dump: &Path, ledger: &mut RunLedger) -> Result<()> {
    let Some(name) = dump.file_name() else {
        return Err(Error::config(format!("{dump:?} has no file name")));
    };
    tracing::debug!(
        "{} -uq {:?} {}",
        tool.display(),
        archiver.archive_filepath(),
        name.to_string_lossy()
    );

    let output = Command::new(tool)
        .current_dir(archiver.destination())
        .arg("-uq")
        .arg(archiver.archive_filepath())
        .arg(name)
        .output()
        .map_err(Error::from)
        .with_msg(format!("Appending {:?} with {} failed", name, tool.display()))?;
    record_diagnostics(tool, &output, ledger);

    if !output.status.success() {
        ledger.warning(Method::ShellArchiver, tool_failed(tool, &output));
    }
    Ok(())
}

/// Runs `zip -T` on `archive` and requires the pass marker in its output.
pub fn test_integrity(tool: &Path, archive: &Path) -> Result<()> {
    let output = Command::new(tool)
        .arg("-T")
        .arg(archive)
        .output()
        .map_err(Error::from)
        .with_msg(format!("Testing {archive:?} failed"))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if output.status.success() && stdout.contains(INTEGRITY_MARKER) {
        tracing::debug!("{} -T {:?}: {}", tool.display(), archive, stdout.trim());
        Ok(())
    } else {
        Err(tool_failed(tool, &output).with_msg(format!("Integrity test of {archive:?} failed")))
    }
}

fn record_diagnostics(tool: &Path, output: &Output, ledger: &mut RunLedger) {
    let stderr = String::from_utf8_lossy(&output.stderr);
    for line in stderr.lines().map(str::trim).filter(|l| !l.is_empty()) {
        ledger.warning(Method::ShellArchiver, format!("{}: {line}", tool.display()));
    }
}

fn tool_failed(tool: &Path, output: &Output) -> Error {
    let combined = [&output.stdout, &output.stderr]
        .iter()
        .map(|bytes| String::from_utf8_lossy(bytes).trim().to_owned())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    Error::ToolFailed {
        tool: tool.to_path_buf(),
        status: output.status,
        output: combined,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::backup::probe::tests::write_script;
    use tempfile::TempDir;

    fn archiver(root: &Path, dest: &Path) -> Archiver {
        Archiver::builder()
            .root(root)
            .destination(dest)
            .archive_filepath(dest.join("site.zip"))
            .build()
    }

    #[test]
    fn test_stderr_becomes_warnings() {
        let temp_dir = TempDir::new().unwrap();
        let tool = write_script(
            temp_dir.path(),
            "zip",
            "echo 'zip warning: could not open for reading: locked.txt' >&2\nexit 18",
        );
        let mut ledger = RunLedger::new();

        create(&archiver(temp_dir.path(), temp_dir.path()), &tool, &mut ledger).unwrap();

        assert!(!ledger.has_errors());
        let warnings = ledger.warnings_for(Method::ShellArchiver);
        assert!(warnings.iter().any(|w| w.contains("could not open for reading")));
        assert!(warnings.iter().any(|w| w.contains("exited with")));
    }

    #[test]
    fn test_nothing_to_do_is_an_error_without_dump() {
        let temp_dir = TempDir::new().unwrap();
        let tool = write_script(temp_dir.path(), "zip", "exit 12");
        let mut ledger = RunLedger::new();

        let result = create(&archiver(temp_dir.path(), temp_dir.path()), &tool, &mut ledger);
        assert!(result.unwrap_err().is_nothing_to_archive());
    }

    #[test]
    fn test_exclude_flag_omitted_without_rules() {
        let temp_dir = TempDir::new().unwrap();
        let args = temp_dir.path().join("args");
        let tool = write_script(
            temp_dir.path(),
            "zip",
            &format!("echo \"$@\" > {}", args.display()),
        );
        let mut ledger = RunLedger::new();

        create(&archiver(temp_dir.path(), temp_dir.path()), &tool, &mut ledger).unwrap();
        let recorded = std::fs::read_to_string(&args).unwrap();
        assert!(recorded.starts_with("-rq "));
        assert!(!recorded.contains("-x"));
    }

    #[test]
    fn test_integrity_requires_marker() {
        let temp_dir = TempDir::new().unwrap();
        let good = write_script(temp_dir.path(), "zip-ok", "echo 'test of site.zip OK'");
        let bad = write_script(temp_dir.path(), "zip-bad", "echo 'test of site.zip FAILED'");
        let archive = temp_dir.path().join("site.zip");

        assert!(test_integrity(&good, &archive).is_ok());
        assert!(test_integrity(&bad, &archive).is_err());
    }
}
