//! The external `mysqldump` binary.

use crate::backup::database::MysqlConfig;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;

use std::path::Path;
use std::process::Command;

/// Printed whenever a password is passed with `-p`; never an error.
///
/// Only the message text is matched, since the prefix changed between
/// releases (`Warning: ` before 5.6, `mysqldump: [Warning] ` since 5.7).
pub const BENIGN_WARNING: &str = "Using a password on the command line interface can be insecure";

pub fn command(tool: &Path, config: &MysqlConfig, output: &Path) -> Command {
    let mut cmd = Command::new(tool);
    cmd.arg("--no-create-db").arg("--hex-blob");
    if *config.single_transaction() {
        cmd.arg("--single-transaction");
    }
    cmd.arg("-u").arg(config.user());
    if !config.password().is_empty() {
        cmd.arg(format!("-p{}", config.password().inner()));
    }
    cmd.arg("-h").arg(config.host());
    if let Some(port) = config.port() {
        cmd.arg("-P").arg(port.to_string());
    }
    cmd.arg("-r").arg(output).arg(config.name());
    cmd
}

/// Drops blank lines and the password warning from the tool output.
pub fn filter_output(stdout: &[u8], stderr: &[u8]) -> String {
    [stdout, stderr]
        .iter()
        .flat_map(|bytes| {
            String::from_utf8_lossy(bytes)
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.contains(BENIGN_WARNING))
                .map(str::to_owned)
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Dumps `config`'s database to `output`. Anything the tool prints beyond
/// the password warning fails the dump.
pub fn dump(tool: &Path, config: &MysqlConfig, output: &Path) -> Result<()> {
    tracing::debug!(
        "{} -u {} -h {} -r {:?} {}",
        tool.display(),
        config.user(),
        config.host(),
        output,
        config.name()
    );
    let result = command(tool, config, output)
        .output()
        .map_err(Error::from)
        .with_msg(format!("Running {} failed", tool.display()))?;

    let remaining = filter_output(&result.stdout, &result.stderr);
    if remaining.is_empty() && result.status.success() {
        Ok(())
    } else {
        Err(Error::ToolFailed {
            tool: tool.to_path_buf(),
            status: result.status,
            output: remaining,
        })
    }
}
