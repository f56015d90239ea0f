//! Validation functions for configuration values.
//!
//! Provides custom validation functions for directories and the archive and
//! database dump filenames. Every one of them runs at configuration time so
//! a bad value never reaches a backup run.

use sanitize_filename::{is_sanitized, sanitize};
use validator::ValidationError;

use std::path::Path;

pub const ARCHIVE_EXTENSION: &str = ".zip";
pub const DUMP_EXTENSION: &str = ".sql";

fn invalid<S: Into<String>>(code: &'static str, msg: S) -> ValidationError {
    let msg: String = msg.into();
    ValidationError::new(code).with_message(msg.into())
}

fn validate_bare_filename(name: &str, extension: &str, code: &'static str) -> Result<(), ValidationError> {
    if name.contains(['/', '\\']) {
        return Err(invalid(code, format!("{name:?} must not contain path separators")));
    }
    if !name.to_ascii_lowercase().ends_with(extension) || name.len() == extension.len() {
        return Err(invalid(code, format!("{name:?} must end in {extension}")));
    }
    if !is_sanitized(name) {
        return Err(invalid(
            code,
            format!("Invalid file name, try sanitizing like {:?}", sanitize(name)),
        ));
    }
    Ok(())
}

pub fn validate_archive_filename<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    validate_bare_filename(name.as_ref(), ARCHIVE_EXTENSION, "InvalidArchiveFilename")
}

pub fn validate_dump_filename<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    validate_bare_filename(name.as_ref(), DUMP_EXTENSION, "InvalidDumpFilename")
}

pub fn validate_dir_exist<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(invalid("InvalidDirectory", format!("{:?} is not a directory", dir)));
        }
    } else {
        return Err(invalid("InvalidDirectory", format!("{:?} not found", dir)));
    }

    Ok(())
}

pub fn validate_file_exist<P: AsRef<Path>>(file: P) -> Result<(), ValidationError> {
    let file = file.as_ref();
    if !file.is_file() {
        return Err(invalid("InvalidFile", format!("{:?} is not an existing file", file)));
    }
    Ok(())
}

pub fn validate_dir_exist_or_created<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(invalid("InvalidDirectory", format!("{:?} is not a directory", dir)));
        }
    } else {
        return std::fs::create_dir_all(dir).map_err(|e| {
            invalid(
                "InvalidDirectory",
                format!("cannot create or access destination {:?}: {}", dir, e),
            )
        });
    }

    Ok(())
}

pub fn validate_writable_dir<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    validate_dir_exist_or_created(dir)?;
    let md = std::fs::metadata(dir).map_err(|e| {
        invalid(
            "InvalidDirectory",
            format!("cannot access metadata for {:?}: {}", dir, e),
        )
    })?;
    if md.permissions().readonly() {
        Err(invalid("InvalidDirectory", format!("cannot write to dir {:?}", dir)))
    } else {
        Ok(())
    }
}
