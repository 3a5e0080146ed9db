//! SSH transport: remote commands through the system `ssh` client.
//! Password logins go through `sshpass`; key logins call `ssh` directly.

use std::time::Duration;

use crate::config::types::Credentials;
use crate::error::Result;
use crate::system::executor::{Cli, CommandOutput};

pub const SSH_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_USER: &str = "root";

/// Options old iLO firmware needs to negotiate with a modern OpenSSH client.
pub const LEGACY_RSA_OPTIONS: [(&str, &str); 3] = [
    ("PubKeyAcceptedKeyTypes", "+ssh-rsa"),
    ("HostKeyAlgorithms", "+ssh-rsa"),
    ("KexAlgorithms", "+diffie-hellman-group14-sha1"),
];

#[derive(Debug, Clone)]
pub struct Ssh {
    cli: Cli,
    destination: String,
    password: Option<String>,
    options: Vec<(String, String)>,
}

impl Ssh {
    /// `fallback_host` is used when the credentials carry no hostname (the OS
    /// credentials of a host default to the host's own name).
    pub fn new(creds: &Credentials, fallback_host: &str) -> Self {
        let hostname = if creds.hostname.is_empty() { fallback_host } else { creds.hostname.as_str() };
        let username = if creds.username.is_empty() { DEFAULT_USER } else { creds.username.as_str() };
        let password = creds.password.clone().filter(|p| !p.is_empty());
        let mut cli = Cli::new(SSH_TIMEOUT);
        if let Some(p) = &password {
            cli = cli.with_secret(p);
        }
        Self {
            cli,
            destination: format!("{}@{}", username, hostname),
            password,
            options: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: &[(&str, &str)]) -> Self {
        self.options
            .extend(options.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn command_line(&self, remote: &str) -> Vec<String> {
        let mut argv = Vec::new();
        if let Some(password) = &self.password {
            argv.extend(["sshpass".to_string(), "-p".to_string(), password.clone()]);
        }
        argv.extend(["ssh".to_string(), "-o".to_string(), "StrictHostKeyChecking=no".to_string()]);
        for (key, value) in &self.options {
            argv.push("-o".to_string());
            argv.push(format!("{}={}", key, value));
        }
        argv.push(self.destination.clone());
        argv.push(remote.to_string());
        argv
    }

    /// Run `remote` on the far side and return its output whatever the exit code.
    pub async fn run(&self, remote: &str) -> Result<CommandOutput> {
        self.cli.execute(&self.command_line(remote)).await
    }

    /// Like [`run`](Self::run) but a non-zero exit is a transport error.
    pub async fn run_checked(&self, remote: &str) -> Result<CommandOutput> {
        self.run(remote).await?.check()
    }
}
