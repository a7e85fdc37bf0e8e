//! Load config from file and environment.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::{bail, Context};
use pong_core::link::KEY_MATERIAL_LEN;
use pong_core::SessionConfig;
use serde::Deserialize;

/// Daemon configuration. File: ~/.config/pong/config.toml or /etc/pong/config.toml.
/// Env overrides: PONG_PORT, PONG_CHANNEL, PONG_BROADCAST_ADDR, PONG_SEND_COUNT,
/// PONG_SEND_DELAY_MS, PONG_PACKET_LEN.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Base UDP port (default 45700).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Channel; devices only hear each other on the same channel (default 1).
    #[serde(default = "default_channel")]
    pub channel: u8,
    /// Broadcast destination (default 255.255.255.255).
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: Ipv4Addr,
    /// Primary master key, 16 ASCII bytes.
    #[serde(default = "default_pmk")]
    pub pmk: String,
    /// Local master key for unicast links, 16 ASCII bytes.
    #[serde(default = "default_lmk")]
    pub lmk: String,
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_port() -> u16 {
    45700
}
fn default_channel() -> u8 {
    1
}
fn default_broadcast_addr() -> Ipv4Addr {
    Ipv4Addr::BROADCAST
}
fn default_pmk() -> String {
    "pmk1234567890123".to_string()
}
fn default_lmk() -> String {
    "lmk1234567890123".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            channel: default_channel(),
            broadcast_addr: default_broadcast_addr(),
            pmk: default_pmk(),
            lmk: default_lmk(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    /// UDP port actually bound: one port per channel.
    pub fn channel_port(&self) -> anyhow::Result<u16> {
        self.port
            .checked_add(self.channel as u16)
            .with_context(|| format!("port {} + channel {} overflows", self.port, self.channel))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.session.validate()?;
        self.channel_port()?;
        for (name, key) in [("pmk", &self.pmk), ("lmk", &self.lmk)] {
            if key.len() != KEY_MATERIAL_LEN {
                bail!("{name} must be {KEY_MATERIAL_LEN} bytes, got {}", key.len());
            }
        }
        Ok(())
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> anyhow::Result<Config> {
    let mut c = match load_file()? {
        Some(c) => c,
        None => Config::default(),
    };
    apply_env(&mut c, |k| std::env::var(k).ok())?;
    c.validate()?;
    Ok(c)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
    if let Some(s) = var("PONG_PORT") {
        c.port = s.parse().context("PONG_PORT")?;
    }
    if let Some(s) = var("PONG_CHANNEL") {
        c.channel = s.parse().context("PONG_CHANNEL")?;
    }
    if let Some(s) = var("PONG_BROADCAST_ADDR") {
        c.broadcast_addr = s.parse().context("PONG_BROADCAST_ADDR")?;
    }
    if let Some(s) = var("PONG_SEND_COUNT") {
        c.session.send_count = s.parse().context("PONG_SEND_COUNT")?;
    }
    if let Some(s) = var("PONG_SEND_DELAY_MS") {
        c.session.send_delay_ms = s.parse().context("PONG_SEND_DELAY_MS")?;
    }
    if let Some(s) = var("PONG_PACKET_LEN") {
        c.session.packet_len = s.parse().context("PONG_PACKET_LEN")?;
    }
    Ok(())
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/pong/config.toml"));
    }
    out.push(PathBuf::from("/etc/pong/config.toml"));
    out
}

/// First existing config file wins. A file that exists but fails to parse is an error.
fn load_file() -> anyhow::Result<Option<Config>> {
    for p in config_paths() {
        if p.exists() {
            let s = std::fs::read_to_string(&p)
                .with_context(|| format!("reading {}", p.display()))?;
            let c = toml::from_str::<Config>(&s)
                .with_context(|| format!("parsing {}", p.display()))?;
            return Ok(Some(c));
        }
    }
    Ok(None)
}
