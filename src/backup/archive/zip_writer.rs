//! Deflated zip archives written with `zip::ZipWriter`.
//!
//! The writer is finished and reopened in append mode every
//! [`REOPEN_EVERY`] entries so very large trees never keep a growing
//! central directory and open handles around for the whole run.

use crate::backup::archive::enumerate::{EntryKind, FileEntry};
use crate::backup::archive::Archiver;
use crate::backup::ledger::{Method, RunLedger};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use std::fs::{File, OpenOptions};
use std::path::Path;

pub const REOPEN_EVERY: usize = 500;

pub fn create(archiver: &Archiver, ledger: &mut RunLedger) -> Result<()> {
    let enumeration = if archiver.include_files() {
        let enumeration = archiver.enumerate()?;
        for entry in enumeration.unreadable() {
            ledger.warning(
                Method::ZipWriter,
                format!("Skipped unreadable {} {}", entry.kind(), entry.relative()),
            );
        }
        if enumeration.is_empty() && archiver.dump_filepath().is_none() {
            return Err(Error::NothingToArchive);
        }
        Some(enumeration)
    } else {
        None
    };

    let archive_path = archiver.archive_filepath();
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(
        File::create(archive_path)
            .map_err(Error::from)
            .with_msg(format!("Creating {archive_path:?} failed"))?,
    );

    let mut written = 0usize;
    for entry in enumeration.iter().flat_map(|e| e.included()) {
        if written > 0 && written % REOPEN_EVERY == 0 {
            writer = reopen(writer, archive_path)?;
        }
        if add_entry(&mut writer, entry, options, ledger) {
            written += 1;
        }
    }

    if let Some(dump) = archiver.dump_filepath() {
        let name = archiver.dump_filename().unwrap_or_default();
        match File::open(dump) {
            Ok(mut file) => {
                writer.start_file(name.as_str(), options)?;
                std::io::copy(&mut file, &mut writer)?;
                written += 1;
            }
            Err(e) => ledger.error(
                Method::ZipWriter,
                format!("Cannot read database dump {dump:?}: {e}"),
            ),
        }
    }

    writer
        .finish()
        .map_err(Error::from)
        .with_msg(format!("Finishing {archive_path:?} failed"))?;
    tracing::debug!("Wrote {written} entries to {archive_path:?}");
    Ok(())
}

fn reopen(writer: ZipWriter<File>, path: &Path) -> Result<ZipWriter<File>> {
    tracing::trace!("Reopening {path:?}");
    drop(writer.finish()?);
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    Ok(ZipWriter::new_append(file)?)
}

/// Adds one enumerated entry. Entries that vanished or became unreadable
/// since enumeration are skipped with a warning.
fn add_entry(
    writer: &mut ZipWriter<File>,
    entry: &FileEntry,
    options: SimpleFileOptions,
    ledger: &mut RunLedger,
) -> bool {
    let result = match entry.kind() {
        EntryKind::Directory => writer
            .add_directory(entry.relative().as_str(), options)
            .map_err(Error::from),
        EntryKind::File | EntryKind::Symlink => File::open(entry.path())
            .map_err(Error::from)
            .and_then(|mut file| {
                writer.start_file(entry.relative().as_str(), options)?;
                std::io::copy(&mut file, writer)?;
                Ok(())
            }),
    };

    match result {
        Ok(()) => {
            tracing::trace!("Added {} {}", entry.kind(), entry.relative());
            true
        }
        Err(e) => {
            ledger.warning(
                Method::ZipWriter,
                format!("Skipped {} {}: {e}", entry.kind(), entry.relative()),
            );
            false
        }
    }
}
