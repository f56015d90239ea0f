//! Last resort archiver: a whole-tree writer that stores entries without
//! compression, so it needs nothing beyond the `zip` container code.

use crate::backup::archive::enumerate::{is_broken_link, EntryKind};
use crate::backup::archive::Archiver;
use crate::backup::ledger::{Method, RunLedger};
use crate::backup::path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;

use getset::{CopyGetters, Getters};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use std::fs::File;
use std::path::{Path, PathBuf};

/// An entry offered to the [`TreeZip::add_tree`] callback.
#[derive(Debug, Getters, CopyGetters)]
pub struct TreeCandidate {
    #[getset(get = "pub")]
    path: PathBuf,
    #[getset(get = "pub")]
    relative: String,
    #[getset(get_copy = "pub")]
    kind: EntryKind,
}

pub struct TreeZip {
    writer: ZipWriter<File>,
    options: SimpleFileOptions,
    errors: Vec<String>,
    entries: usize,
}

impl TreeZip {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())
            .map_err(Error::from)
            .with_msg(format!("Creating {:?} failed", path.as_ref()))?;
        Ok(Self {
            writer: ZipWriter::new(file),
            options: SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
            errors: Vec::new(),
            entries: 0,
        })
    }

    /// Adds everything under `root` that `accept` lets through, stored under
    /// its root-relative name. A rejected directory is not descended into.
    /// Returns the number of entries added.
    pub fn add_tree<F>(&mut self, root: &Path, mut accept: F) -> usize
    where
        F: FnMut(&TreeCandidate) -> bool,
    {
        let root_str = path::normalize_path(root);
        let before = self.entries;
        let mut walker = WalkDir::new(root)
            .follow_links(true)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter();

        while let Some(next) = walker.next() {
            let de = match next {
                Ok(de) => de,
                Err(e) => {
                    match e.path() {
                        Some(p) if is_broken_link(p) => {
                            tracing::debug!("Skipping broken symlink {p:?}")
                        }
                        _ => self.errors.push(e.to_string()),
                    }
                    continue;
                }
            };

            let full = path::normalize_path(de.path());
            let Some(relative) = path::relative_to(&full, &root_str).map(str::to_owned) else {
                continue;
            };
            let kind = if de.file_type().is_dir() {
                EntryKind::Directory
            } else if de.path_is_symlink() {
                EntryKind::Symlink
            } else {
                EntryKind::File
            };
            let candidate = TreeCandidate {
                path: de.into_path(),
                relative,
                kind,
            };

            if !accept(&candidate) {
                tracing::trace!("Callback rejected {}", candidate.relative);
                if kind == EntryKind::Directory {
                    walker.skip_current_dir();
                }
                continue;
            }

            if kind == EntryKind::Directory {
                match self
                    .writer
                    .add_directory(candidate.relative.as_str(), self.options)
                {
                    Ok(()) => self.entries += 1,
                    Err(e) => self.errors.push(format!("{}: {e}", candidate.relative)),
                }
            } else {
                self.add_file(&candidate.path, &candidate.relative);
            }
        }

        self.entries - before
    }

    /// Adds a single file under `stored_name`. Failures end up in
    /// [`TreeZip::error_info`].
    pub fn add_file(&mut self, path: &Path, stored_name: &str) -> bool {
        let result = File::open(path).map_err(Error::from).and_then(|mut file| {
            self.writer.start_file(stored_name, self.options)?;
            std::io::copy(&mut file, &mut self.writer)?;
            Ok(())
        });
        match result {
            Ok(()) => {
                self.entries += 1;
                true
            }
            Err(e) => {
                self.errors.push(format!("{stored_name}: {e}"));
                false
            }
        }
    }

    pub fn error_info(&self) -> &[String] {
        &self.errors
    }

    pub fn entry_count(&self) -> usize {
        self.entries
    }

    pub fn close(self) -> Result<()> {
        self.writer.finish()?;
        Ok(())
    }
}

pub fn create(archiver: &Archiver, ledger: &mut RunLedger) -> Result<()> {
    let mut tree = TreeZip::create(archiver.archive_filepath())?;

    if archiver.include_files() {
        let matcher = archiver.exclude_matcher()?;
        let skip = archiver
            .artifacts()
            .iter()
            .map(path::normalize_path)
            .collect::<Vec<_>>();
        let mut unreadable = Vec::new();

        let added = tree.add_tree(archiver.root(), |candidate| {
            if skip.contains(&path::normalize_path(candidate.path())) {
                return false;
            }
            if matcher.is_match(candidate.relative()) {
                return false;
            }
            if !archiver.is_readable(candidate.path(), candidate.kind()) {
                unreadable.push(format!("{} {}", candidate.kind(), candidate.relative()));
                return false;
            }
            true
        });
        tracing::debug!("Added {added} entries from {:?}", archiver.root());

        for entry in unreadable {
            ledger.warning(Method::ZipTree, format!("Skipped unreadable {entry}"));
        }
    }

    if let (Some(dump), Some(name)) = (archiver.dump_filepath(), archiver.dump_filename()) {
        tree.add_file(dump, &name);
    }

    for error in tree.error_info() {
        ledger.warning(Method::ZipTree, error);
    }
    let empty = tree.entry_count() == 0;
    tree.close()?;

    if empty {
        return Err(Error::NothingToArchive);
    }
    Ok(())
}
