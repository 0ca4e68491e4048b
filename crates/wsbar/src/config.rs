use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
const MIN_POLL_INTERVAL_MS: u64 = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One plain-text line per update.
    Text,
    /// swaybar/i3bar JSON protocol with pango markup.
    Swaybar,
}

#[derive(Parser, Debug)]
#[command(name = "wsbar", about = "Workspace-aware status strip for sway/i3")]
pub struct Args {
    /// Compositor IPC socket (defaults to $WSBAR_SOCKET, $SWAYSOCK, $I3SOCK)
    #[arg(long)]
    socket: Option<PathBuf>,
    /// Focused-window poll interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    poll_interval_ms: u64,
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,
    #[arg(long, default_value = "/proc")]
    proc_root: PathBuf,
    #[arg(long, default_value = "/sys")]
    sys_root: PathBuf,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    /// Disable the cpu/temperature/memory/battery segments
    #[arg(long, default_value_t = false)]
    no_metrics: bool,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub socket_path: Option<PathBuf>,
    pub poll_interval: Duration,
    pub format: OutputFormat,
    pub proc_root: PathBuf,
    pub sys_root: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub debug: bool,
    pub metrics_enabled: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no compositor socket: pass --socket or set SWAYSOCK")]
    MissingSocket,
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

impl Config {
    pub fn socket_path(&self) -> Result<&Path, ConfigError> {
        self.socket_path
            .as_deref()
            .ok_or(ConfigError::MissingSocket)
    }
}

pub fn load_config() -> Result<Config, ConfigError> {
    Config::from_args(Args::parse(), |key| std::env::var(key).ok())
}

impl Config {
    pub fn from_args<F>(args: Args, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let socket_path = resolve_socket_path(args.socket, &env);
        let format = match args.format {
            Some(format) => format,
            None => resolve_format(&env)?,
        };
        let log_dir = resolve_log_dir(&args.log_dir, &env);
        let debug = args.debug || resolve_flag(&env, "WSBAR_DEBUG").unwrap_or(false);
        let metrics_enabled =
            !args.no_metrics && resolve_flag(&env, "WSBAR_METRICS").unwrap_or(true);

        Ok(Self {
            socket_path,
            poll_interval: Duration::from_millis(args.poll_interval_ms.max(MIN_POLL_INTERVAL_MS)),
            format,
            proc_root: args.proc_root,
            sys_root: args.sys_root,
            log_dir,
            debug,
            metrics_enabled,
        })
    }
}

fn non_empty<F>(env: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    env(key).filter(|value| !value.trim().is_empty())
}

fn resolve_socket_path<F>(flag: Option<PathBuf>, env: &F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = flag {
        return Some(path);
    }
    ["WSBAR_SOCKET", "SWAYSOCK", "I3SOCK"]
        .iter()
        .find_map(|key| non_empty(env, key))
        .map(PathBuf::from)
}

fn resolve_format<F>(env: &F) -> Result<OutputFormat, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match non_empty(env, "WSBAR_FORMAT") {
        None => Ok(OutputFormat::Text),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "swaybar" | "i3bar" => Ok(OutputFormat::Swaybar),
            _ => Err(ConfigError::InvalidValue {
                key: "WSBAR_FORMAT",
                value,
            }),
        },
    }
}

fn resolve_log_dir<F>(flag: &str, env: &F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    if !flag.trim().is_empty() {
        return Some(PathBuf::from(flag));
    }
    non_empty(env, "WSBAR_LOG_DIR").map(PathBuf::from)
}

fn resolve_flag<F>(env: &F, key: &str) -> Option<bool>
where
    F: Fn(&str) -> Option<String>,
{
    env(key).and_then(|value| parse_bool_flag(&value))
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
