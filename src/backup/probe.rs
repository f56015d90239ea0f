//! Discovery of the external `zip` and `mysqldump` binaries.
//!
//! A missing tool is not an error, it is what selects the in-process
//! fallbacks. Probing happens once and is cached on the job; each run
//! refreshes the cache so a tool removed or installed between runs is
//! noticed.

use std::path::{Path, PathBuf};

pub const ARCHIVER_CANDIDATES: &[&str] = &["zip", "/usr/bin/zip"];

pub const DUMP_TOOL_CANDIDATES: &[&str] = &[
    "mysqldump",
    "/usr/local/bin/mysqldump",
    "/usr/local/mysql/bin/mysqldump",
    "/usr/mysql/bin/mysqldump",
    "/usr/bin/mysqldump",
    "/opt/local/lib/mysql5/bin/mysqldump",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolCapability {
    Available(PathBuf),
    Unavailable,
}

impl ToolCapability {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ToolCapability::Available(path) => Some(path),
            ToolCapability::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, ToolCapability::Available(_))
    }
}

pub trait ToolProbe {
    /// Returns the first candidate that resolves to a usable executable.
    fn probe(&self, candidates: &[PathBuf]) -> ToolCapability;
}

/// Looks candidates up on the real filesystem, resolving bare names
/// through `PATH`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemProbe;

impl ToolProbe for SystemProbe {
    fn probe(&self, candidates: &[PathBuf]) -> ToolCapability {
        candidates
            .iter()
            .find_map(|candidate| resolve(candidate))
            .map(ToolCapability::Available)
            .unwrap_or(ToolCapability::Unavailable)
    }
}

fn resolve(candidate: &Path) -> Option<PathBuf> {
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(candidate))
        .find(|full| is_executable(full))
}

#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|md| md.is_file() && md.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|md| md.is_file())
        .unwrap_or(false)
}

/// A probed tool plus the candidates it was probed from.
#[derive(Clone, Debug)]
pub struct CachedTool {
    name: &'static str,
    candidates: Vec<PathBuf>,
    cached: Option<ToolCapability>,
}

impl CachedTool {
    pub fn new(name: &'static str, candidates: Vec<PathBuf>) -> Self {
        Self {
            name,
            candidates,
            cached: None,
        }
    }

    /// A tool that is never used.
    pub fn disabled(name: &'static str) -> Self {
        Self {
            name,
            candidates: Vec::new(),
            cached: Some(ToolCapability::Unavailable),
        }
    }

    pub fn with_defaults(name: &'static str, defaults: &[&str]) -> Self {
        Self::new(name, defaults.iter().map(PathBuf::from).collect())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The cached capability, probing on first use.
    pub fn capability(&mut self, probe: &dyn ToolProbe) -> ToolCapability {
        if let Some(cached) = &self.cached {
            return cached.clone();
        }
        let capability = probe.probe(&self.candidates);
        match &capability {
            ToolCapability::Available(path) => {
                tracing::debug!("Found {} at {}", self.name, path.display())
            }
            ToolCapability::Unavailable => tracing::debug!("No usable {} found", self.name),
        }
        self.cached = Some(capability.clone());
        capability
    }

    /// Revalidates the cache at the start of a run.
    ///
    /// A cached path is kept only while it is still executable; an
    /// `Unavailable` result is probed again.
    pub fn refresh(&mut self, probe: &dyn ToolProbe) -> ToolCapability {
        if self.candidates.is_empty() {
            self.cached = Some(ToolCapability::Unavailable);
        }
        if let Some(ToolCapability::Available(path)) = &self.cached {
            if !is_executable(path) {
                tracing::info!("{} at {} is gone, probing again", self.name, path.display());
                self.cached = None;
            }
        } else if !self.candidates.is_empty() {
            self.cached = None;
        }
        self.capability(probe)
    }
}
