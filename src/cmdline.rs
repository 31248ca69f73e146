//! Kernel cmdline parser for init parameters

use anyhow::{Context, Result};
use std::collections::HashMap;

use crate::ubi::UBI_CTRL;

/// Parsed init configuration from kernel cmdline
#[derive(Debug, PartialEq)]
pub struct Config {
    /// Boot script to run
    pub script: String,
    /// Kernel-style log level (0-7) overriding the default filter
    pub loglevel: Option<u32>,
    /// UBI control node for attach requests
    pub ubi_ctrl: String,
    /// Directory holding `persist.*` properties
    pub persist_dir: String,
    /// Environment variables to set
    pub env_vars: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            script: "/init.rc".to_string(),
            loglevel: None,
            ubi_ctrl: UBI_CTRL.to_string(),
            persist_dir: "/data/property".to_string(),
            env_vars: HashMap::new(),
        }
    }
}

/// Parse kernel cmdline into Config
///
/// Supports: init.rc, init.loglevel, init.ubi_ctrl, init.persist, init.env.XXX
pub fn parse_cmdline(cmdline: &str) -> Result<Config> {
    let mut config = Config::default();

    for param in cmdline.split_whitespace() {
        if let Some(value) = param.strip_prefix("init.rc=") {
            config.script = value.to_string();
        } else if let Some(value) = param.strip_prefix("init.loglevel=") {
            let level = value
                .parse()
                .with_context(|| format!("Invalid init.loglevel: {}", value))?;
            config.loglevel = Some(level);
        } else if let Some(value) = param.strip_prefix("init.ubi_ctrl=") {
            config.ubi_ctrl = value.to_string();
        } else if let Some(value) = param.strip_prefix("init.persist=") {
            config.persist_dir = value.to_string();
        } else if let Some(rest) = param.strip_prefix("init.env.") {
            if let Some((key, value)) = rest.split_once('=') {
                config.env_vars.insert(key.to_string(), value.to_string());
            }
        }
    }

    Ok(config)
}

/// Read kernel cmdline from /proc/cmdline
pub fn read_cmdline() -> Result<String> {
    std::fs::read_to_string("/proc/cmdline")
        .context("Failed to read /proc/cmdline")
        .map(|s| s.trim().to_string())
}
