use crate::backup::database::DatabaseConfig;
use crate::backup::job::{BackupJob, BackupType};
use crate::backup::probe::{CachedTool, ARCHIVER_CANDIDATES, DUMP_TOOL_CANDIDATES};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::validate::{
    validate_archive_filename, validate_dir_exist, validate_dump_filename, validate_writable_dir,
};

use serde::{Deserialize, Serialize};
use validator::Validate;

use std::path::PathBuf;

/// The YAML configuration file of one site.
#[derive(Clone, Serialize, Deserialize, Debug, Validate)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    #[validate(length(min = 1))]
    pub site_name: String,
    #[validate(custom(function = validate_dir_exist))]
    pub root: PathBuf,
    /// Defaults to `<root>/backups`.
    #[validate(custom(function = validate_writable_dir))]
    pub destination: Option<PathBuf>,
    /// Defaults to `complete` when a database is configured, `file` otherwise.
    #[serde(rename = "type")]
    pub backup_type: Option<BackupType>,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[validate(custom(function = validate_archive_filename))]
    pub archive_filename: Option<String>,
    #[validate(custom(function = validate_dump_filename))]
    pub database_dump_filename: Option<String>,
    pub external_archiver: Option<PathBuf>,
    pub external_dump_tool: Option<PathBuf>,
    /// Look for `zip` and `mysqldump` in the usual places. When off, only
    /// the explicit paths above are used.
    #[serde(default = "default_true")]
    pub probe_external_tools: bool,
    pub database: Option<DatabaseConfig>,
}

fn default_true() -> bool {
    true
}

fn tool(
    name: &'static str,
    explicit: Option<PathBuf>,
    probe: bool,
    defaults: &[&str],
) -> CachedTool {
    let mut candidates = explicit.into_iter().collect::<Vec<_>>();
    if probe {
        candidates.extend(defaults.iter().map(PathBuf::from));
    }
    if candidates.is_empty() {
        CachedTool::disabled(name)
    } else {
        CachedTool::new(name, candidates)
    }
}

impl BackupConfig {
    pub fn backup_type(&self) -> BackupType {
        self.backup_type.unwrap_or(if self.database.is_some() {
            BackupType::Complete
        } else {
            BackupType::File
        })
    }

    /// Validates the whole configuration, database included, and builds
    /// the job.
    pub fn into_job(self) -> Result<BackupJob> {
        self.validate()?;
        if let Some(database) = &self.database {
            database
                .validate()
                .map_err(Error::from)
                .with_msg("Invalid database configuration")?;
        }

        let backup_type = self.backup_type();
        BackupJob::builder()
            .root(self.root)
            .maybe_destination(self.destination)
            .site_name(self.site_name)
            .maybe_archive_filename(self.archive_filename)
            .maybe_database_dump_filename(self.database_dump_filename)
            .backup_type(backup_type)
            .excludes(self.excludes)
            .archiver(tool(
                "zip",
                self.external_archiver,
                self.probe_external_tools,
                ARCHIVER_CANDIDATES,
            ))
            .dump_tool(tool(
                "mysqldump",
                self.external_dump_tool,
                self.probe_external_tools,
                DUMP_TOOL_CANDIDATES,
            ))
            .maybe_database(self.database)
            .build()
    }
}
