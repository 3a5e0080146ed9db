//! ipmitool wrapper over the subprocess executor.
//! Every call goes to a remote BMC over `lanplus`.

use std::time::Duration;

use tracing::{debug, error};

use crate::config::types::Credentials;
use crate::error::{HushError, Result};
use crate::system::executor::{Cli, CommandOutput};

pub const IPMI_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct IpmiTool {
    cli: Cli,
    hostname: String,
    base_args: Vec<String>,
}

impl IpmiTool {
    pub fn new(oob: &Credentials) -> Self {
        let password = oob.password_or_empty().to_string();
        let base_args = vec![
            "ipmitool".to_string(),
            "-I".to_string(),
            "lanplus".to_string(),
            "-H".to_string(),
            oob.hostname.clone(),
            "-U".to_string(),
            oob.username.clone(),
            "-P".to_string(),
            password.clone(),
        ];
        Self {
            cli: Cli::new(IPMI_TIMEOUT).with_secret(&password),
            hostname: oob.hostname.clone(),
            base_args,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Full argv for an ipmitool sub-command such as `-c sdr` or `raw 0x30 0x45 0`.
    pub fn command_line(&self, command: &str) -> Result<Vec<String>> {
        let extra = shell_words::split(command)
            .map_err(|e| HushError::protocol(format!("bad ipmitool arguments '{}': {}", command, e)))?;
        Ok(self.base_args.iter().cloned().chain(extra).collect())
    }

    /// Run a sub-command; a non-zero exit is a transport error.
    pub async fn execute(&self, command: &str) -> Result<CommandOutput> {
        let argv = self.command_line(command)?;
        let output = self.cli.execute(&argv).await?;
        if output.return_code != Some(0) {
            error!("{} failed to run `{}`", self.hostname, command);
        }
        output.check()
    }

    /// `ipmitool raw <bytes>` for OEM commands (fan mode, PWM writes).
    pub async fn raw(&self, bytes: &str) -> Result<CommandOutput> {
        debug!("{} ipmitool raw {}", self.hostname, bytes);
        self.execute(&format!("raw {}", bytes)).await
    }

    /// `ipmitool -c sdr`: comma-separated sensor repository dump.
    pub async fn sdr_csv(&self) -> Result<CommandOutput> {
        self.execute("-c sdr").await
    }

    /// `ipmitool fru`: field replaceable unit inventory.
    pub async fn fru(&self) -> Result<CommandOutput> {
        self.execute("fru").await
    }
}
