use clap::Parser;
use site_backup::backup::backup_config::BackupConfig;
use site_backup::backup::job::BackupType;
use site_backup::backup::probe::SystemProbe;
use site_backup::backup::result_error::error::Error;
use site_backup::backup::result_error::result::Result;
use site_backup::backup::result_error::WithMsg;
use std::fs::File;
use std::path::PathBuf;
use std::process::exit;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use validator::Validate;

/// Back up a website's files and database into one zip archive
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long)]
    config: PathBuf,
    /// Override the backup type from the config file
    #[arg(short = 't', long = "type", value_enum)]
    backup_type: Option<BackupType>,
    /// Log filter used when RUST_LOG is not set
    #[arg(short, long, default_value = "info")]
    verbose: String,
}

fn load(args: &Args) -> Result<BackupConfig> {
    let config = File::open(&args.config)
        .map_err(Error::from)
        .and_then(|f| {
            serde_yml::from_reader::<_, BackupConfig>(f)
                .map_err(Error::from)
                .with_msg(format!("Parse YAML config failed: {:?}", &args.config))
        })?;
    config
        .validate()
        .map_err(Error::from)
        .with_msg(format!("Config validation failed: {:?}", &args.config))?;
    Ok(config)
}

fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.verbose)),
        )
        .init();

    let res = load(&args).and_then(|mut config| {
        if args.backup_type.is_some() {
            config.backup_type = args.backup_type;
        }
        let mut job = config.into_job()?;
        job.backup(&SystemProbe)
    });

    match res {
        Ok(ledger) => {
            println!("{ledger}");
            if ledger.succeeded() {
                if ledger.warning_count() > 0 {
                    warn!("Backup finished with {} warnings", ledger.warning_count());
                } else {
                    info!("Backup finished");
                }
                exit(0);
            }
            error!("Backup failed");
        }
        Err(e) => error!("{e}"),
    }

    exit(1);
}
