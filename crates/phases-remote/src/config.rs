use std::{env, time::Duration};

use anyhow::{bail, Context};
use clap::Parser;
use url::Url;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;
pub const SOCKET_PATH: &str = "/websocket";

#[derive(Parser, Debug, Default)]
#[command(
    name = "phases-remote",
    about = "Remote control console for a Phases sequencer controller"
)]
pub struct Args {
    #[arg(long, default_value = "")]
    pub host: String,
    #[arg(long, default_value = "")]
    pub port: String,
    /// Full socket url; overrides host and port.
    #[arg(long, default_value = "")]
    pub url: String,
    #[arg(long, default_value = "")]
    pub poll_interval_ms: String,
    #[arg(long, default_value = "")]
    pub log_dir: String,
}

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub url: Url,
    pub poll_interval: Duration,
    pub log_dir: String,
    pub log_stderr: bool,
}

pub fn load_config(args: &Args) -> anyhow::Result<RuntimeConfig> {
    Ok(RuntimeConfig {
        url: resolve_url(&args.url, &args.host, &args.port)?,
        poll_interval: resolve_poll_interval(&args.poll_interval_ms)?,
        log_dir: resolve_log_dir(&args.log_dir),
        log_stderr: resolve_log_stderr(),
    })
}

fn resolve_url(flag_url: &str, flag_host: &str, flag_port: &str) -> anyhow::Result<Url> {
    if let Some(value) = flag_or_env(flag_url, "PHASES_URL") {
        let url = Url::parse(&value).with_context(|| format!("invalid controller url: {value}"))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            bail!("controller url must use ws or wss: {value}");
        }
        return Ok(url);
    }
    let host = flag_or_env(flag_host, "PHASES_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = match flag_or_env(flag_port, "PHASES_PORT") {
        Some(value) => value
            .trim()
            .parse::<u16>()
            .with_context(|| format!("invalid controller port: {value}"))?,
        None => DEFAULT_PORT,
    };
    socket_url(&host, port)
}

/// `ws://{host}:{port}/websocket`, the controller's only socket route.
pub fn socket_url(host: &str, port: u16) -> anyhow::Result<Url> {
    let raw = format!("ws://{}:{port}{SOCKET_PATH}", host.trim());
    Url::parse(&raw).with_context(|| format!("invalid controller address: {raw}"))
}

fn resolve_poll_interval(flag: &str) -> anyhow::Result<Duration> {
    let millis = match flag_or_env(flag, "PHASES_POLL_INTERVAL_MS") {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid poll interval: {value}"))?,
        None => DEFAULT_POLL_INTERVAL_MS,
    };
    Ok(Duration::from_millis(millis.max(1)))
}

fn resolve_log_dir(flag: &str) -> String {
    flag_or_env(flag, "PHASES_LOG_DIR").unwrap_or_default()
}

fn resolve_log_stderr() -> bool {
    if let Ok(value) = env::var("PHASES_LOG_STDERR") {
        if let Some(parsed) = parse_bool_env(&value) {
            return parsed;
        }
    }
    true
}

fn flag_or_env(flag: &str, key: &str) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.to_string());
    }
    if let Ok(value) = env::var(key) {
        if !value.trim().is_empty() {
            return Some(value);
        }
    }
    None
}

pub(crate) fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" | "off" | "OFF" => Some(false),
        _ => None,
    }
}
