//! # site-backup
//!
//! Backs up a website's files and database into a single verified zip
//! archive.
//!
//! ## Features
//!
//! - **Exclude rules**: shell globs such as `wp-content/cache/` or `*.log`,
//!   honoured the same way by every archiving method
//! - **Database dumps**: `mysqldump` when it is installed, an in-process
//!   SQL writer otherwise (MySQL behind the `mysql` feature, SQLite always)
//! - **Archiving with fallbacks**: the `zip` binary, then two in-process
//!   writers, each result verified before it is accepted
//! - **Run ledger**: every error and warning, grouped by stage and method
//!
//! ## Quick Start
//!
//! ```no_run
//! use site_backup::backup::backup_config::BackupConfig;
//! use site_backup::backup::probe::SystemProbe;
//!
//! let config: BackupConfig = serde_yml::from_reader(std::fs::File::open("config.yml")?)?;
//! let mut job = config.into_job()?;
//! let ledger = job.backup(&SystemProbe)?;
//! println!("{ledger}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
