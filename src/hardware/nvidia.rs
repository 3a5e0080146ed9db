//! Nvidia GPUs on the host OS: `nvidia-smi` for temperatures, `nvidia-settings` for fans.

use async_trait::async_trait;
use tracing::{error, info};

use crate::config::types::{Credentials, Vendor};
use crate::error::{HushError, Result};
use crate::hardware::types::SpeedValue;
use crate::hardware::Device;
use crate::system::parser::{max_temperature, parse_nvidia_temperatures};
use crate::system::ssh::Ssh;

const QUERY_TEMPERATURE: &str = "nvidia-smi --query-gpu=temperature.gpu --format=csv,noheader";

pub struct Nvidia {
    ssh: Ssh,
    controlling: bool,
}

impl Nvidia {
    pub fn new(os: &Credentials, host: &str) -> Self {
        Self { ssh: Ssh::new(os, host), controlling: false }
    }
}

pub(crate) fn fan_command(percent: u8) -> String {
    format!(
        "export DISPLAY=:0 && nvidia-settings -c $DISPLAY -a \"GPUFanControlState=1\" -a \"GPUTargetFanSpeed={}\"",
        percent
    )
}

/// nvidia-settings echoes one "assigned value" line per accepted attribute.
pub(crate) fn both_assigned(stdout: &str) -> bool {
    stdout.matches("assigned value").count() == 2
}

#[async_trait]
impl Device for Nvidia {
    fn vendor(&self) -> Vendor {
        Vendor::Nvidia
    }

    async fn get_temp(&mut self) -> Result<i32> {
        let out = self.ssh.run_checked(QUERY_TEMPERATURE).await?;
        max_temperature(&parse_nvidia_temperatures(&out.stdout())?)
            .ok_or_else(|| HushError::protocol(format!("{} lists no GPUs", self.ssh.destination())))
    }

    async fn set_speed(&mut self, speed: SpeedValue) -> Result<()> {
        let percent = speed.to_percent();
        let out = self.ssh.run_checked(&fan_command(percent)).await?;
        let stdout = out.stdout();
        if !both_assigned(&stdout) {
            error!("{} failed to set GPU fan speed: {}", self.ssh.destination(), stdout);
            return Err(HushError::protocol(format!(
                "{} did not confirm GPU fan speed {}",
                self.ssh.destination(),
                percent
            )));
        }
        self.controlling = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.controlling {
            return Ok(());
        }
        self.ssh
            .run_checked("export DISPLAY=:0 && nvidia-settings -c $DISPLAY -a \"GPUFanControlState=0\"")
            .await?;
        self.controlling = false;
        info!("{} GPU fans returned to driver control", self.ssh.destination());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_command_sets_state_and_target() {
        assert_eq!(
            fan_command(60),
            "export DISPLAY=:0 && nvidia-settings -c $DISPLAY -a \"GPUFanControlState=1\" -a \"GPUTargetFanSpeed=60\""
        );
    }

    #[test]
    fn both_attributes_must_be_assigned() {
        let ok = "  Attribute 'GPUFanControlState' (box:0[gpu:0]) assigned value 1.\n\
                  \x20 Attribute 'GPUTargetFanSpeed' (box:0[fan:0]) assigned value 60.\n";
        assert!(both_assigned(ok));
        assert!(!both_assigned("  Attribute 'GPUFanControlState' (box:0[gpu:0]) assigned value 1.\n"));
        assert!(!both_assigned(""));
    }

    #[tokio::test]
    async fn close_before_any_write_does_nothing() {
        let mut gpu = Nvidia::new(&Credentials::default(), "unreachable.invalid");
        gpu.close().await.unwrap();
    }
}
