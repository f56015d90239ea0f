use crate::backup::exclude::ExcludeMatcher;
use crate::backup::function_path;
use crate::backup::path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithDebugObjectAndFnName;

use bon::Builder;
use derive_more::Display;
use function_name::named;
use getset::{CopyGetters, Getters};
use walkdir::{DirEntry, WalkDir};

use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum EntryKind {
    #[display("file")]
    File,
    #[display("directory")]
    Directory,
    /// A link to an existing regular file, archived as the file it points to.
    #[display("symlink")]
    Symlink,
}

/// One node found under the backup root.
#[derive(Clone, Debug, PartialEq, Eq, Getters, CopyGetters)]
pub struct FileEntry {
    #[getset(get = "pub")]
    path: PathBuf,
    /// Root-relative, normalised, never starts with a separator.
    #[getset(get = "pub")]
    relative: String,
    #[getset(get_copy = "pub")]
    kind: EntryKind,
    #[getset(get_copy = "pub")]
    readable: bool,
}

#[derive(Debug, Default, Getters)]
#[getset(get = "pub")]
pub struct Enumeration {
    included: Vec<FileEntry>,
    unreadable: Vec<FileEntry>,
    broken_links: Vec<String>,
}

impl Enumeration {
    pub fn is_empty(&self) -> bool {
        self.included.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.included
            .iter()
            .filter(|e| e.kind != EntryKind::Directory)
            .count()
    }
}

/// Walks `root` and splits what it finds into archivable and unreadable
/// entries.
///
/// Excluded directories are pruned without descending into them. The paths
/// in `skip` (the archive being written and the database dump) are never
/// returned.
#[derive(Builder)]
pub struct FileEnumerator<'a> {
    #[builder(into)]
    root: PathBuf,
    matcher: &'a ExcludeMatcher,
    #[builder(default)]
    skip: Vec<PathBuf>,
    #[builder(default = is_readable as ReadableCheck)]
    readable: ReadableCheck,
}

impl FileEnumerator<'_> {
    #[named]
    pub fn enumerate(&self) -> Result<Enumeration> {
        if !self.root.is_dir() {
            tracing::error!(
                "Backup root does not exist or is not a directory: {:?}",
                self.root
            );
            return Err(
                Error::from(std::io::Error::other("root is not a directory"))
                    .with_debug_object_and_fn_name(self.root.clone(), function_path!()),
            );
        }

        let root = path::normalize_path(&self.root);
        let skip = self.skip.iter().map(path::normalize_path).collect::<Vec<_>>();
        let mut enumeration = Enumeration::default();

        tracing::debug!("Enumerating {root}");

        let mut walker = WalkDir::new(&self.root)
            .follow_links(true)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter();

        while let Some(next) = walker.next() {
            let de = match next {
                Ok(de) => de,
                Err(e) => {
                    self.record_walk_error(e, &root, &mut enumeration);
                    continue;
                }
            };

            let full = path::normalize_path(de.path());
            let Some(relative) = path::relative_to(&full, &root).map(str::to_owned) else {
                tracing::trace!("Skipping {full}, outside of {root}");
                continue;
            };

            if skip.contains(&full) {
                tracing::trace!("Skipping backup artifact {full}");
                continue;
            }

            if self.matcher.is_match(&relative) {
                tracing::trace!("Excluding {relative}");
                if de.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            }

            let entry = classify(de, relative, self.readable);
            if entry.readable {
                tracing::trace!("Including {} {}", entry.kind, entry.relative);
                enumeration.included.push(entry);
            } else {
                tracing::warn!("Skipping unreadable {} {}", entry.kind, entry.relative);
                if entry.kind == EntryKind::Directory {
                    walker.skip_current_dir();
                }
                enumeration.unreadable.push(entry);
            }
        }

        tracing::debug!(
            "Enumerated {} entries under {root}, {} unreadable, {} broken links",
            enumeration.included.len(),
            enumeration.unreadable.len(),
            enumeration.broken_links.len()
        );

        Ok(enumeration)
    }

    fn record_walk_error(&self, e: walkdir::Error, root: &str, enumeration: &mut Enumeration) {
        let Some(failed) = e.path().map(Path::to_path_buf) else {
            tracing::warn!("Walking {root} failed: {e}");
            return;
        };
        let full = path::normalize_path(&failed);
        let relative = path::relative_to(&full, root).unwrap_or(&full).to_owned();

        if is_broken_link(&failed) {
            tracing::debug!("Skipping broken symlink {relative}");
            enumeration.broken_links.push(relative);
            return;
        }

        tracing::warn!("Cannot read {relative}: {e}");
        let kind = if failed.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        enumeration.unreadable.push(FileEntry {
            path: failed,
            relative,
            kind,
            readable: false,
        });
    }
}

fn classify(de: DirEntry, relative: String, readable: ReadableCheck) -> FileEntry {
    let kind = if de.file_type().is_dir() {
        EntryKind::Directory
    } else if de.path_is_symlink() {
        EntryKind::Symlink
    } else {
        EntryKind::File
    };
    let path = de.into_path();
    let readable = readable(&path, kind);
    FileEntry {
        path,
        relative,
        kind,
        readable,
    }
}

/// Decides whether an entry can be opened for archiving.
pub type ReadableCheck = fn(&Path, EntryKind) -> bool;

pub fn is_readable(path: &Path, kind: EntryKind) -> bool {
    match kind {
        EntryKind::Directory => std::fs::read_dir(path).is_ok(),
        EntryKind::File | EntryKind::Symlink => File::open(path).is_ok(),
    }
}

/// A symlink whose target does not exist.
pub(crate) fn is_broken_link(path: &Path) -> bool {
    path.symlink_metadata()
        .map(|md| md.file_type().is_symlink())
        .unwrap_or(false)
        && std::fs::metadata(path).is_err()
}
