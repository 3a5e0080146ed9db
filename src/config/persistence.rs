//! Config file load, save, and migration logic.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::types::HushConfig;

const LEGACY_CREDENTIALS: [(&str, &str); 2] = [("oob", "oob"), ("os", "os")];
const LEGACY_PID_KEYS: [(&str, &str); 4] = [("kp", "Kp"), ("ki", "Ki"), ("kd", "Kd"), ("target", "Target")];

/// Default config location: `config.json` next to the executable.
pub fn default_config_path() -> Result<PathBuf> {
    let exe_dir = std::env::current_exe()?
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Cannot determine executable directory"))?
        .to_path_buf();
    Ok(exe_dir.join("config.json"))
}

/// Rewrite first-generation host entries in place. Returns whether anything changed.
fn migrate_host(name: &str, host: &mut Map<String, Value>) -> bool {
    let mut migrated = false;

    // flat `oob_address`/`oob_username`/`oob_password` -> nested object
    for (prefix, section) in LEGACY_CREDENTIALS {
        let mut creds = Map::new();
        for (old, new) in [("address", "hostname"), ("username", "username"), ("password", "password")] {
            if let Some(value) = host.remove(&format!("{}_{}", prefix, old)) {
                creds.insert(new.to_string(), value);
            }
        }
        if !creds.is_empty() {
            let target = host
                .entry(section.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(existing) = target.as_object_mut() {
                for (k, v) in creds {
                    existing.entry(k).or_insert(v);
                }
            }
            info!("Migrated {}: flat {}_* keys -> '{}'", name, prefix, section);
            migrated = true;
        }
    }

    if let Some(rate) = host.remove("rate") {
        if !host.contains_key("delay") {
            host.insert("delay".to_string(), rate);
        }
        info!("Migrated {}: 'rate' -> 'delay'", name);
        migrated = true;
    }

    if let Some(algo) = host.get_mut("algo").and_then(Value::as_object_mut) {
        for (group, entry) in algo.iter_mut() {
            let Some(pid) = entry.get_mut("pid").and_then(Value::as_object_mut) else {
                continue;
            };
            for (old, new) in LEGACY_PID_KEYS {
                if let Some(value) = pid.remove(old) {
                    pid.entry(new.to_string()).or_insert(value);
                    info!("Migrated {}: algo.{}.pid.{} -> {}", name, group, old, new);
                    migrated = true;
                }
            }
        }
    }

    migrated
}

/// Migrate config to the current layout in memory. Returns whether anything changed.
pub(crate) fn migrate_value(json: &mut Value) -> bool {
    let mut migrated = false;
    if let Some(hosts) = json.get_mut("hosts").and_then(Value::as_object_mut) {
        for (name, host) in hosts.iter_mut() {
            if let Some(host) = host.as_object_mut() {
                migrated |= migrate_host(name, host);
            }
        }
    }
    migrated
}

/// Migrate the file on disk, rewriting it only when something changed.
pub(crate) fn migrate_config(config_path: &Path) -> Result<bool> {
    if !config_path.exists() {
        return Ok(false);
    }

    let content = std::fs::read_to_string(config_path)?;
    let mut json: Value = serde_json::from_str(&content)?;
    let migrated = migrate_value(&mut json);

    if migrated {
        std::fs::write(config_path, serde_json::to_string_pretty(&json)?)?;
        info!("Config migrated to latest version: {:?}", config_path);
    }

    Ok(migrated)
}

pub async fn load_config(path: Option<&Path>) -> Result<HushConfig> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };

    // Migrate config first (handles old configs automatically)
    if let Err(e) = migrate_config(&config_path) {
        warn!("Config migration check failed: {}", e);
    }

    if config_path.exists() {
        let content = tokio::fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("Failed to read {:?}", config_path))?;
        let config: HushConfig = serde_json::from_str(&content)
            .with_context(|| format!("Invalid configuration in {:?}", config_path))?;

        for (name, host) in &config.hosts {
            if host.speed.is_shared() && host.shared_target(crate::config::types::SensorGroup::Speed).is_none() {
                warn!("{} shares its speed driver but names no target host", name);
            }
        }

        info!("Loaded configuration from: {:?} ({} hosts)", config_path, config.hosts.len());
        Ok(config)
    } else {
        warn!("Config file not found at {:?}. Starting with no hosts.", config_path);
        Ok(HushConfig::default())
    }
}

pub async fn save_config(config: &HushConfig, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write {:?}", path))?;
    info!("Configuration saved to: {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{DriverSelection, SensorGroup, Vendor};
    use serde_json::json;

    #[test]
    fn flat_credentials_and_rate_are_migrated() {
        let mut json = json!({
            "hosts": {
                "r720": {
                    "oob_address": "10.0.0.5",
                    "oob_username": "root",
                    "oob_password": "calvin",
                    "os_password": "hunter2",
                    "rate": 15,
                    "algo": {"cpu": {"type": "pid", "pid": {"kp": 3, "ki": 0.1, "kd": 0, "target": 50}}}
                }
            }
        });
        assert!(migrate_value(&mut json));

        let host = &json["hosts"]["r720"];
        assert_eq!(host["oob"], json!({"hostname": "10.0.0.5", "username": "root", "password": "calvin"}));
        assert_eq!(host["os"], json!({"password": "hunter2"}));
        assert_eq!(host["delay"], 15);
        assert!(host.get("rate").is_none());
        assert_eq!(host["algo"]["cpu"]["pid"], json!({"Kp": 3, "Ki": 0.1, "Kd": 0, "Target": 50}));

        assert!(!migrate_value(&mut json), "second pass must be a no-op");
    }

    #[tokio::test]
    async fn load_rewrites_legacy_file_and_parses_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"hosts": {"r720": {"oob_address": "10.0.0.5", "cpu": "Dell iDRAC 8", "rate": 10}}}"#,
        )
        .unwrap();

        let config = load_config(Some(path.as_path())).await.unwrap();
        let host = config.host("r720").unwrap();
        assert_eq!(host.oob.hostname, "10.0.0.5");
        assert_eq!(host.delay, 10);
        assert_eq!(host.selection(SensorGroup::Cpu), &DriverSelection::Vendor(Vendor::DellIdrac8));

        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert!(on_disk.contains("\"delay\""));
        assert!(!on_disk.contains("oob_address"));
    }

    #[tokio::test]
    async fn missing_file_yields_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(dir.path().join("absent.json").as_path())).await.unwrap();
        assert!(config.hosts.is_empty());
        assert_eq!(config.agent.tick_interval, 1.0);
    }

    #[tokio::test]
    async fn save_then_load_keeps_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = HushConfig::default();
        config.host_mut("jbod").chassis = DriverSelection::Vendor(Vendor::OpenJbod);

        save_config(&config, &path).await.unwrap();
        let loaded = load_config(Some(path.as_path())).await.unwrap();
        assert_eq!(loaded.host("jbod").unwrap(), config.host("jbod").unwrap());
    }
}
