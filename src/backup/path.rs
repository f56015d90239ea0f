//! Path canonicalisation shared by every component that compares paths.
//!
//! All paths handled by the backup engine are plain strings with forward
//! slashes, no doubled separators and no trailing separator. The root
//! directory is the only path allowed to end in `/`.

use std::path::Path;

/// Normalises `path` until a fixed point is reached.
///
/// Backslashes become forward slashes, doubled slashes collapse and one
/// trailing slash is removed. An empty result, including an empty input,
/// is the root `/`.
pub fn normalize<S: AsRef<str>>(path: S) -> String {
    let mut current = path.as_ref().to_owned();
    loop {
        let next = normalize_once(&current);
        if next == current {
            return next;
        }
        current = next;
    }
}

/// [`normalize`] for a filesystem path, lossily converted to UTF-8.
pub fn normalize_path<P: AsRef<Path>>(path: P) -> String {
    normalize(path.as_ref().to_string_lossy())
}

/// Appends `name` to the normalised directory `dir`.
///
/// Joining onto `/` does not produce a doubled separator.
pub fn join<S: AsRef<str>>(dir: &str, name: S) -> String {
    normalize(format!("{}/{}", dir, name.as_ref()))
}

/// Strips the normalised `root` from the normalised `path`, returning the
/// root-relative remainder without a leading separator.
///
/// Returns `None` when `path` does not live under `root`.
pub fn relative_to<'a>(path: &'a str, root: &str) -> Option<&'a str> {
    if root == "/" {
        return path.strip_prefix('/');
    }
    match path.strip_prefix(root)? {
        "" => Some(""),
        rest => rest.strip_prefix('/'),
    }
}

/// Whether the normalised `path` is `root` itself or lies below it.
pub fn is_within(path: &str, root: &str) -> bool {
    relative_to(path, root).is_some()
}

fn normalize_once(path: &str) -> String {
    let replaced = path.replace('\\', "/").replace("//", "/");
    match replaced.strip_suffix('/') {
        Some("") => "/".to_owned(),
        Some(stripped) => stripped.to_owned(),
        None if replaced.is_empty() => "/".to_owned(),
        None => replaced,
    }
}
