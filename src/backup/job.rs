//! One backup run: where the files come from, where the archive goes and
//! which database is dumped alongside.

use crate::backup::archive::Archiver;
use crate::backup::database::{DatabaseConfig, DatabaseDumper};
use crate::backup::exclude::sanitize_rules;
use crate::backup::ledger::RunLedger;
use crate::backup::path;
use crate::backup::probe::{
    CachedTool, ToolCapability, ToolProbe, ARCHIVER_CANDIDATES, DUMP_TOOL_CANDIDATES,
};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::validate::{
    validate_archive_filename, validate_dir_exist, validate_dump_filename, validate_writable_dir,
};

use bon::bon;
use derive_more::Display;
use getset::{CopyGetters, Getters};
use sanitize_filename::sanitize;
use serde::{Deserialize, Serialize};
use validator::ValidationError;

use std::path::{Path, PathBuf};

static TIME_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// What a run puts in the archive.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Display, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    /// Files and the database dump.
    #[default]
    #[display("complete")]
    Complete,
    /// Files only.
    #[display("file")]
    File,
    /// The database dump only.
    #[display("database")]
    Database,
}

impl BackupType {
    pub fn includes_files(self) -> bool {
        matches!(self, BackupType::Complete | BackupType::File)
    }

    pub fn includes_database(self) -> bool {
        matches!(self, BackupType::Complete | BackupType::Database)
    }
}

fn invalid(e: ValidationError) -> Error {
    Error::config(e.to_string())
}

#[derive(Debug, Getters, CopyGetters)]
pub struct BackupJob {
    #[getset(get = "pub")]
    root: PathBuf,
    #[getset(get = "pub")]
    destination: PathBuf,
    #[getset(get = "pub")]
    site_name: String,
    #[getset(get = "pub")]
    archive_filename: String,
    #[getset(get = "pub")]
    database_dump_filename: String,
    #[getset(get_copy = "pub")]
    backup_type: BackupType,
    raw_excludes: Vec<String>,
    #[getset(get = "pub")]
    archiver: CachedTool,
    #[getset(get = "pub")]
    dump_tool: CachedTool,
    #[getset(get = "pub")]
    database: Option<DatabaseConfig>,
}

#[bon]
impl BackupJob {
    /// Every value is checked here, so a job that builds is ready to run.
    #[builder]
    pub fn new(
        #[builder(into)] root: PathBuf,
        #[builder(into)] destination: Option<PathBuf>,
        #[builder(into)] site_name: Option<String>,
        #[builder(into)] archive_filename: Option<String>,
        #[builder(into)] database_dump_filename: Option<String>,
        #[builder(default)] backup_type: BackupType,
        #[builder(default)] excludes: Vec<String>,
        archiver: Option<CachedTool>,
        dump_tool: Option<CachedTool>,
        database: Option<DatabaseConfig>,
    ) -> Result<Self> {
        let root = canonical_root(&root)?;
        let destination = match destination {
            Some(destination) => prepare_destination(&destination)?,
            None => prepare_destination(&root.join("backups"))?,
        };
        let site_name = site_name.unwrap_or_else(|| {
            root.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "site".to_owned())
        });

        let archive_filename = match archive_filename {
            Some(name) => {
                validate_archive_filename(&name).map_err(invalid)?;
                name
            }
            None => default_archive_filename(&site_name),
        };
        let database_dump_filename = match database_dump_filename {
            Some(name) => {
                validate_dump_filename(&name).map_err(invalid)?;
                name
            }
            None => default_dump_filename(database.as_ref()),
        };

        let job = Self {
            root,
            destination,
            site_name,
            archive_filename,
            database_dump_filename,
            backup_type,
            raw_excludes: sanitize_rules(excludes),
            archiver: archiver
                .unwrap_or_else(|| CachedTool::with_defaults("zip", ARCHIVER_CANDIDATES)),
            dump_tool: dump_tool
                .unwrap_or_else(|| CachedTool::with_defaults("mysqldump", DUMP_TOOL_CANDIDATES)),
            database,
        };
        job.check_database()?;
        tracing::debug!("Configured {job:?}");
        Ok(job)
    }
}

fn canonical_root(root: &Path) -> Result<PathBuf> {
    validate_dir_exist(root).map_err(invalid)?;
    std::fs::canonicalize(root)
        .map_err(Error::from)
        .with_msg(format!("Resolving root {root:?} failed"))
}

fn prepare_destination(destination: &Path) -> Result<PathBuf> {
    validate_writable_dir(destination).map_err(invalid)?;
    std::fs::canonicalize(destination)
        .map_err(Error::from)
        .with_msg(format!("Resolving destination {destination:?} failed"))
}

fn default_archive_filename(site_name: &str) -> String {
    let timestamp = chrono::Local::now().format(TIME_FORMAT);
    sanitize(format!("{site_name}.backup.{timestamp}.zip")).to_lowercase()
}

fn default_dump_filename(database: Option<&DatabaseConfig>) -> String {
    match database {
        Some(database) => sanitize(format!("database_{}.sql", database.name())),
        None => "database.sql".to_owned(),
    }
}

impl BackupJob {
    fn check_database(&self) -> Result<()> {
        if self.backup_type.includes_database() && self.database.is_none() {
            return Err(Error::config(format!(
                "a {} backup needs a database",
                self.backup_type
            )));
        }
        Ok(())
    }

    pub fn set_root<P: AsRef<Path>>(&mut self, root: P) -> Result<()> {
        self.root = canonical_root(root.as_ref())?;
        Ok(())
    }

    pub fn set_destination<P: AsRef<Path>>(&mut self, destination: P) -> Result<()> {
        self.destination = prepare_destination(destination.as_ref())?;
        Ok(())
    }

    pub fn set_archive_filename<S: Into<String>>(&mut self, name: S) -> Result<()> {
        let name = name.into();
        validate_archive_filename(&name).map_err(invalid)?;
        self.archive_filename = name;
        Ok(())
    }

    pub fn set_database_dump_filename<S: Into<String>>(&mut self, name: S) -> Result<()> {
        let name = name.into();
        validate_dump_filename(&name).map_err(invalid)?;
        self.database_dump_filename = name;
        Ok(())
    }

    pub fn set_excludes<I, S>(&mut self, rules: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.raw_excludes = sanitize_rules(rules);
    }

    pub fn set_backup_type(&mut self, backup_type: BackupType) -> Result<()> {
        let previous = std::mem::replace(&mut self.backup_type, backup_type);
        self.check_database().inspect_err(|_| self.backup_type = previous)
    }

    pub fn archive_filepath(&self) -> PathBuf {
        PathBuf::from(path::join(
            &path::normalize_path(&self.destination),
            &self.archive_filename,
        ))
    }

    pub fn database_dump_filepath(&self) -> PathBuf {
        PathBuf::from(path::join(
            &path::normalize_path(&self.destination),
            &self.database_dump_filename,
        ))
    }

    /// The exclude rules for this run. A destination inside the root is
    /// excluded as well.
    pub fn excludes(&self) -> Vec<String> {
        let root = path::normalize_path(&self.root);
        let destination = path::normalize_path(&self.destination);
        let mut rules = self.raw_excludes.clone();
        if destination != root && path::is_within(&destination, &root) {
            rules.push(format!("{destination}/"));
        }
        sanitize_rules(rules)
    }

    /// Runs the dump and archive stages.
    ///
    /// Failures of the stages are recorded in the returned ledger. Only a
    /// destination that can no longer be written to is an `Err`.
    pub fn backup(&mut self, probe: &dyn ToolProbe) -> Result<RunLedger> {
        validate_writable_dir(&self.destination).map_err(invalid)?;
        let mut ledger = RunLedger::new();

        let archiver_tool = self.archiver.refresh(probe);
        tracing::info!(
            "Starting {} backup of {:?} into {:?}",
            self.backup_type,
            self.root,
            self.archive_filepath()
        );

        let mut dump_filepath = None;
        if self.backup_type.includes_database() {
            let Some(database) = &self.database else {
                return Err(Error::config("no database configured"));
            };
            let dump_tool = if database.supports_external_dump() {
                self.dump_tool.refresh(probe)
            } else {
                ToolCapability::Unavailable
            };

            let outcome = DatabaseDumper::builder()
                .database(database)
                .dump_filepath(self.database_dump_filepath())
                .dump_tool(dump_tool)
                .site_name(self.site_name.as_str())
                .build()
                .run(&mut ledger);
            if !outcome.is_success() {
                tracing::error!("No database dump, skipping the archive");
                return Ok(ledger);
            }
            dump_filepath = Some(self.database_dump_filepath());
        }

        Archiver::builder()
            .root(self.root.clone())
            .destination(self.destination.clone())
            .archive_filepath(self.archive_filepath())
            .maybe_dump_filepath(dump_filepath)
            .include_files(self.backup_type.includes_files())
            .excludes(self.excludes())
            .shell_tool(archiver_tool)
            .build()
            .run(&mut ledger);

        if ledger.succeeded() {
            tracing::info!("Backup written to {:?}", self.archive_filepath());
        } else {
            tracing::error!("Backup of {:?} failed", self.root);
        }
        Ok(ledger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::archive::enumerate::tests::create_fixture;
    use crate::backup::archive::tests::file_entries;
    use crate::backup::database::driver::sqlite::tests::create_database;
    use crate::backup::database::SqliteConfig;
    use crate::backup::ledger::Method;
    use crate::backup::probe::tests::FixedProbe;
    use tempfile::TempDir;

    fn no_tools() -> FixedProbe {
        FixedProbe::new(ToolCapability::Unavailable)
    }

    fn sqlite_job(root: &Path, backup_type: BackupType) -> BackupJob {
        let db = root.join("site.db");
        create_database(&db);
        BackupJob::builder()
            .root(root)
            .site_name("Example Site")
            .backup_type(backup_type)
            .database(SqliteConfig::builder().path(db).build().into())
            .build()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let root = TempDir::new().unwrap();
        let job = BackupJob::builder()
            .root(root.path())
            .site_name("Example Site")
            .backup_type(BackupType::File)
            .build()
            .unwrap();

        let canonical = std::fs::canonicalize(root.path()).unwrap();
        assert_eq!(job.destination(), &canonical.join("backups"));
        assert!(job.destination().is_dir());
        assert!(job.archive_filename().starts_with("example site.backup."));
        assert!(job.archive_filename().ends_with(".zip"));
        assert_eq!(job.database_dump_filename(), "database.sql");
        assert_eq!(
            job.archive_filepath(),
            canonical.join("backups").join(job.archive_filename())
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let root = TempDir::new().unwrap();
        assert!(BackupJob::builder()
            .root(root.path().join("missing"))
            .build()
            .is_err());
        assert!(BackupJob::builder()
            .root(root.path())
            .backup_type(BackupType::File)
            .archive_filename("backup.tar.gz")
            .build()
            .is_err());
        // A complete backup without a database would silently ship files only.
        assert!(BackupJob::builder().root(root.path()).build().is_err());

        let mut job = BackupJob::builder()
            .root(root.path())
            .backup_type(BackupType::File)
            .build()
            .unwrap();
        assert!(job.set_database_dump_filename("dump.txt").is_err());
        assert!(job.set_database_dump_filename("dump.sql").is_ok());
        assert!(job.set_backup_type(BackupType::Database).is_err());
        assert_eq!(job.backup_type(), BackupType::File);
    }

    #[test]
    fn test_excludes() {
        let root = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let mut job = BackupJob::builder()
            .root(root.path())
            .backup_type(BackupType::File)
            .excludes(vec![" cache/ ".to_owned(), "cache/".to_owned(), "".to_owned()])
            .build()
            .unwrap();

        let destination = path::normalize_path(job.destination());
        assert_eq!(job.excludes(), ["cache/".to_owned(), format!("{destination}/")]);

        job.set_destination(outside.path()).unwrap();
        assert_eq!(job.excludes(), ["cache/"]);

        job.set_excludes(["*.log"]);
        assert_eq!(job.excludes(), ["*.log"]);
    }

    #[test]
    fn test_file_backup_without_tools() {
        let root = TempDir::new().unwrap();
        create_fixture(root.path()).unwrap();
        let mut job = BackupJob::builder()
            .root(root.path())
            .backup_type(BackupType::File)
            .excludes(vec!["exclude/".to_owned()])
            .build()
            .unwrap();

        let ledger = job.backup(&no_tools()).unwrap();
        assert!(ledger.succeeded(), "{ledger}");
        assert_eq!(ledger.archive_method(), Some(Method::ZipWriter));
        assert_eq!(
            file_entries(&job.archive_filepath()),
            ["first.txt", "nested/second.txt", "test-data.txt"]
        );
    }

    #[test]
    fn test_database_backup_holds_only_the_dump() {
        let root = TempDir::new().unwrap();
        create_fixture(root.path()).unwrap();
        let mut job = sqlite_job(root.path(), BackupType::Database);

        let ledger = job.backup(&no_tools()).unwrap();
        assert!(ledger.succeeded(), "{ledger}");
        assert_eq!(ledger.dump_method(), Some(Method::FallbackDump));
        assert_eq!(file_entries(&job.archive_filepath()), ["database_site.sql"]);
        assert!(!job.database_dump_filepath().exists());
    }

    #[test]
    fn test_complete_backup() {
        let root = TempDir::new().unwrap();
        create_fixture(root.path()).unwrap();
        let mut job = sqlite_job(root.path(), BackupType::Complete);

        let ledger = job.backup(&no_tools()).unwrap();
        assert!(ledger.succeeded(), "{ledger}");
        let entries = file_entries(&job.archive_filepath());
        assert!(entries.contains(&"database_site.sql".to_owned()));
        assert!(entries.contains(&"site.db".to_owned()));
        assert!(entries.contains(&"test-data.txt".to_owned()));
        assert!(!entries.iter().any(|e| e.starts_with("backups")));
        assert!(!job.database_dump_filepath().exists());
    }

    #[test]
    fn test_complete_backup_without_dump_is_terminal() {
        let root = TempDir::new().unwrap();
        create_fixture(root.path()).unwrap();
        let mut job = sqlite_job(root.path(), BackupType::Complete);
        std::fs::remove_file(root.path().join("site.db")).unwrap();

        let ledger = job.backup(&no_tools()).unwrap();
        assert!(!ledger.succeeded());
        assert!(ledger.has_errors_for(Method::FallbackDump));
        assert_eq!(ledger.archive_method(), None);
        assert!(!job.archive_filepath().exists());
    }

    #[test]
    fn test_tools_are_probed_once_per_run() {
        let root = TempDir::new().unwrap();
        create_fixture(root.path()).unwrap();
        let probe = no_tools();
        let mut job = BackupJob::builder()
            .root(root.path())
            .backup_type(BackupType::File)
            .build()
            .unwrap();

        job.backup(&probe).unwrap();
        assert_eq!(probe.calls.get(), 1);
        job.set_archive_filename("second.zip").unwrap();
        job.backup(&probe).unwrap();
        assert_eq!(probe.calls.get(), 2);
    }
}
