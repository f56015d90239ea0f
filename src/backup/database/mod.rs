pub mod driver;
pub mod mysqldump;
pub mod sql_writer;

use crate::backup::database::driver::sqlite::SqliteDriver;
use crate::backup::database::driver::DatabaseDriver;
use crate::backup::database::sql_writer::{DumpHeader, SqlDumpWriter};
use crate::backup::ledger::{Method, RunLedger, StageOutcome};
use crate::backup::probe::ToolCapability;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::validate::validate_file_exist;

use bon::Builder;
use derive_more::From;
use getset::Getters;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

use std::path::{Path, PathBuf};

/// Database to dump, selected by the `engine` key.
#[derive(Clone, From, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "engine")]
#[serde(rename_all = "snake_case")]
pub enum DatabaseConfig {
    /// A MySQL server, dumped with `mysqldump` or a direct connection.
    Mysql(MysqlConfig),
    /// A SQLite file, always dumped in-process.
    Sqlite(SqliteConfig),
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, PartialEq, Eq, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct MysqlConfig {
    #[validate(length(min = 1))]
    #[builder(into)]
    name: String,
    #[validate(length(min = 1))]
    #[builder(into)]
    user: String,
    #[serde(default)]
    #[builder(default, into)]
    password: RedactedString,
    #[serde(default = "default_host")]
    #[builder(default = default_host(), into)]
    host: String,
    port: Option<u16>,
    #[serde(default = "default_charset")]
    #[builder(default = default_charset(), into)]
    charset: String,
    #[serde(default = "default_true")]
    #[builder(default = true)]
    single_transaction: bool,
}

fn default_host() -> String {
    "localhost".to_owned()
}

fn default_charset() -> String {
    "utf8".to_owned()
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, PartialEq, Eq, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct SqliteConfig {
    #[validate(custom(function = validate_file_exist))]
    #[builder(into)]
    path: PathBuf,
}

impl Validate for DatabaseConfig {
    fn validate(&self) -> std::result::Result<(), ValidationErrors> {
        match self {
            DatabaseConfig::Mysql(config) => config.validate(),
            DatabaseConfig::Sqlite(config) => config.validate(),
        }
    }
}

impl DatabaseConfig {
    /// Name used in the default dump filename and the dump header.
    pub fn name(&self) -> String {
        match self {
            DatabaseConfig::Mysql(config) => config.name.clone(),
            DatabaseConfig::Sqlite(config) => config
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "sqlite".to_owned()),
        }
    }

    pub fn host(&self) -> String {
        match self {
            DatabaseConfig::Mysql(config) => config.host.clone(),
            DatabaseConfig::Sqlite(config) => config.path.to_string_lossy().into_owned(),
        }
    }

    /// Whether an external dump tool can handle this engine.
    pub fn supports_external_dump(&self) -> bool {
        matches!(self, DatabaseConfig::Mysql(_))
    }

    /// Opens the single connection the fallback dump uses.
    pub fn connect(&self) -> Result<Box<dyn DatabaseDriver>> {
        match self {
            DatabaseConfig::Sqlite(config) => Ok(Box::new(SqliteDriver::open(&config.path)?)),
            #[cfg(feature = "mysql")]
            DatabaseConfig::Mysql(config) => Ok(Box::new(driver::mysql::MysqlDriver::open(config)?)),
            #[cfg(not(feature = "mysql"))]
            DatabaseConfig::Mysql(_) => Err(Error::DriverUnavailable("mysql")),
        }
    }
}

/// The database dump stage of a run.
///
/// Tries the external dump tool when there is one, then the in-process
/// dump through a [`DatabaseDriver`]. A dump that fails verification is
/// deleted, so after the stage the dump file exists only when it is good.
#[derive(Builder)]
pub struct DatabaseDumper<'a> {
    database: &'a DatabaseConfig,
    #[builder(into)]
    dump_filepath: PathBuf,
    #[builder(default = ToolCapability::Unavailable)]
    dump_tool: ToolCapability,
    #[builder(default, into)]
    site_name: String,
}

impl DatabaseDumper<'_> {
    pub fn dump_filepath(&self) -> &Path {
        &self.dump_filepath
    }

    fn first_method(&self) -> Method {
        if self.dump_tool.is_available() && self.database.supports_external_dump() {
            Method::ExternalDump
        } else {
            Method::FallbackDump
        }
    }

    pub fn run(&self, ledger: &mut RunLedger) -> StageOutcome {
        self.remove_dump();

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
            tracing::error!("Dumping {} failed: {e}", self.database.name());
        }
        outcome
    }

    pub fn attempt(&self, method: Method, ledger: &mut RunLedger) -> StageOutcome {
        ledger.begin(method);

        let failure = self.write(method).err();
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
                path: self.dump_filepath.clone(),
            };
            ledger.error(method, &unverified);
            unverified
        });
        match method.fallback() {
            Some(_) => StageOutcome::Recoverable(error),
            None => StageOutcome::Fatal(error),
        }
    }

    fn write(&self, method: Method) -> Result<()> {
        match (method, self.database) {
            (Method::ExternalDump, DatabaseConfig::Mysql(config)) => match self.dump_tool.path() {
                Some(tool) => mysqldump::dump(tool, config, &self.dump_filepath),
                None => Err(Error::config("no external dump tool available")),
            },
            (Method::FallbackDump, database) => {
                let mut driver = database.connect()?;
                let written = self.write_with(driver.as_mut(), database);
                let closed = driver.close();
                written.and(closed)
            }
            (other, _) => Err(Error::config(format!(
                "{other} cannot dump {}",
                self.database.name()
            ))),
        }
    }

    fn write_with(&self, driver: &mut dyn DatabaseDriver, database: &DatabaseConfig) -> Result<()> {
        let mut writer = SqlDumpWriter::create(&self.dump_filepath)?;
        writer.header(
            &DumpHeader::builder()
                .site(self.site_name.as_str())
                .host(database.host())
                .database(database.name())
                .build(),
        )?;

        let tables = driver.list_tables()?;
        tracing::debug!("Dumping {} tables of {}", tables.len(), database.name());
        for table in &tables {
            writer.dump_table(driver, table)?;
        }
        writer.finish()
    }

    /// A dump passes when its method recorded no error and it is not empty.
    /// A failing dump is deleted.
    pub fn verify(&self, method: Method, ledger: &RunLedger) -> bool {
        let empty = std::fs::metadata(&self.dump_filepath)
            .map(|md| md.len() == 0)
            .unwrap_or(false);
        if ledger.has_errors_for(method) || empty {
            self.remove_dump();
        }
        self.dump_filepath.exists()
    }

    fn remove_dump(&self) {
        if self.dump_filepath.exists() {
            tracing::debug!("Deleting database dump {:?}", self.dump_filepath);
            if let Err(e) = std::fs::remove_file(&self.dump_filepath) {
                tracing::warn!("Cannot delete {:?}: {e}", self.dump_filepath);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::database::driver::sqlite::tests::create_database;
    use tempfile::TempDir;

    fn sqlite(path: &Path) -> DatabaseConfig {
        SqliteConfig::builder().path(path).build().into()
    }

    fn mysql() -> DatabaseConfig {
        MysqlConfig::builder()
            .name("wordpress")
            .user("wp")
            .password("s3cret")
            .build()
            .into()
    }

    #[test]
    fn test_config_deserialization() {
        let yaml = "engine: mysql\nname: wordpress\nuser: wp\npassword: s3cret\nport: 3307\n";
        let config: DatabaseConfig = serde_yml::from_str(yaml).unwrap();
        match &config {
            DatabaseConfig::Mysql(mysql) => {
                assert_eq!(mysql.host(), "localhost");
                assert_eq!(mysql.port(), &Some(3307));
                assert_eq!(mysql.password().inner(), "s3cret");
                assert!(*mysql.single_transaction());
            }
            other => panic!("Expected mysql config, got {other:?}"),
        }
        assert!(config.validate().is_ok());
        assert!(!serde_yml::to_string(&config).unwrap().contains("s3cret"));

        let missing: DatabaseConfig =
            serde_yml::from_str("engine: sqlite\npath: /nonexistent/site.db\n").unwrap();
        assert!(missing.validate().is_err());
    }

    #[test]
    fn test_fallback_dump_from_sqlite() {
        let temp_dir = TempDir::new().unwrap();
        let db = temp_dir.path().join("site.db");
        create_database(&db);
        let database = sqlite(&db);
        let dump = temp_dir.path().join("database_site.sql");
        let mut ledger = RunLedger::new();

        let outcome = DatabaseDumper::builder()
            .database(&database)
            .dump_filepath(&dump)
            .site_name("example")
            .build()
            .run(&mut ledger);

        assert!(outcome.is_success());
        assert_eq!(ledger.dump_method(), Some(Method::FallbackDump));
        assert!(ledger.dump_verified());

        let sql = std::fs::read_to_string(&dump).unwrap();
        assert!(sql.starts_with("# example : database backup\n"));
        assert!(sql.contains("DROP TABLE IF EXISTS `posts`;"));
        assert!(sql.contains("CREATE TABLE posts"));
        assert!(sql.contains("INSERT INTO `posts` VALUES (1, 'Hello', 10, NULL) ;"));
        assert!(sql.contains(r"INSERT INTO `posts` VALUES (2, 'It\'s \\ here', 7, X'FF00') ;"));
        assert!(sql.contains("INSERT INTO `options` VALUES ('siteurl', '') ;"));
        assert!(sql.contains("# End of data contents of table `posts` (2 records)"));
        assert!(sql.find("`options`") < sql.find("`posts`"));
        assert!(!sql.contains("`titles`"));
    }

    #[test]
    fn test_stale_dump_is_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let db = temp_dir.path().join("site.db");
        create_database(&db);
        let database = sqlite(&db);
        let dump = temp_dir.path().join("database_site.sql");
        std::fs::write(&dump, "stale contents from an interrupted run").unwrap();
        let mut ledger = RunLedger::new();

        let dumper = DatabaseDumper::builder()
            .database(&database)
            .dump_filepath(&dump)
            .build();
        assert!(dumper.run(&mut ledger).is_success());
        assert!(!std::fs::read_to_string(&dump).unwrap().contains("stale"));
    }

    #[test]
    fn test_verify_deletes_empty_dump() {
        let temp_dir = TempDir::new().unwrap();
        let database = mysql();
        let dump = temp_dir.path().join("database_wordpress.sql");
        std::fs::write(&dump, "").unwrap();
        let ledger = RunLedger::new();

        let dumper = DatabaseDumper::builder()
            .database(&database)
            .dump_filepath(&dump)
            .build();
        assert!(!dumper.verify(Method::ExternalDump, &ledger));
        assert!(!dump.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_external_dump_is_preferred() {
        use crate::backup::probe::tests::write_script;

        let temp_dir = TempDir::new().unwrap();
        let tool = write_script(
            temp_dir.path(),
            "mysqldump",
            "while [ $# -gt 0 ]; do\n  if [ \"$1\" = \"-r\" ]; then out=\"$2\"; fi\n  shift\ndone\n\
             echo 'mysqldump: [Warning] Using a password on the command line interface can be insecure.' >&2\n\
             echo 'CREATE TABLE wp_options (option_id bigint);' > \"$out\"",
        );
        let database = mysql();
        let dump = temp_dir.path().join("database_wordpress.sql");
        let mut ledger = RunLedger::new();

        let outcome = DatabaseDumper::builder()
            .database(&database)
            .dump_filepath(&dump)
            .dump_tool(ToolCapability::Available(tool))
            .build()
            .run(&mut ledger);

        assert!(outcome.is_success());
        assert_eq!(ledger.dump_method(), Some(Method::ExternalDump));
        assert_eq!(ledger.warning_count(), 0);
        assert!(!ledger.has_errors());
    }

    #[cfg(all(unix, not(feature = "mysql")))]
    #[test]
    fn test_failed_external_dump_falls_back() {
        use crate::backup::probe::tests::write_script;

        let temp_dir = TempDir::new().unwrap();
        let tool = write_script(
            temp_dir.path(),
            "mysqldump",
            "echo 'mysqldump: Got error: 1045: Access denied for user' >&2\nexit 2",
        );
        let database = mysql();
        let dump = temp_dir.path().join("database_wordpress.sql");
        let mut ledger = RunLedger::new();

        let outcome = DatabaseDumper::builder()
            .database(&database)
            .dump_filepath(&dump)
            .dump_tool(ToolCapability::Available(tool))
            .build()
            .run(&mut ledger);

        match outcome {
            StageOutcome::Fatal(Error::DriverUnavailable(name)) => assert_eq!(name, "mysql"),
            other => panic!("Expected missing driver, got {other:?}"),
        }
        assert!(!ledger.has_errors_for(Method::ExternalDump));
        assert!(ledger.warnings_for(Method::ExternalDump)[0].contains("Access denied"));
        assert!(ledger.has_errors_for(Method::FallbackDump));
        assert!(!dump.exists());
    }
}
