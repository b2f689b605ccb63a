use crate::error::{ApiError, ErrorCode, PipeResult};
use crate::render::OutputFormat;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "sqlpipe.toml";

pub const DEFAULT_LOGIN_COMMANDS: [&str; 4] = [
    "set linesize 512",
    "col error for a220",
    "set timing off",
    "set serveroutput on",
];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub shell: ShellConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub socket_path: String,
    pub log_file: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            log_file: String::new(),
        }
    }
}

fn default_socket_path() -> String {
    if let Ok(dir) = env::var("XDG_RUNTIME_DIR")
        && is_dir(&dir)
    {
        return format!("{}/sqlpipe.sock", dir);
    }

    let uid = unsafe { libc::geteuid() };
    let run_user_dir = format!("/run/user/{}", uid);
    if is_dir(&run_user_dir) {
        return format!("{}/sqlpipe.sock", run_user_dir);
    }

    format!("/tmp/sqlpipe-{}.sock", uid)
}

fn is_dir(path: &str) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub program: String,
    pub args: Vec<String>,
    pub ready_marker: String,
    pub ready_probe: String,
    pub startup_timeout_ms: u64,
    /// Upper bound on capturing one command batch; 0 waits forever.
    pub exec_timeout_ms: u64,
    pub login_commands: Vec<String>,
    pub clear_command: String,
    pub echo_command: String,
    pub connect_command: String,
    pub structured_on: String,
    pub structured_off: String,
    pub exit_command: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: "sqlplus".to_string(),
            args: vec!["-S".to_string(), "/nolog".to_string()],
            ready_marker: "not connected".to_string(),
            ready_probe: "select 1 from dual;".to_string(),
            startup_timeout_ms: 30_000,
            exec_timeout_ms: 600_000,
            login_commands: Vec::new(),
            clear_command: "clear screen".to_string(),
            echo_command: "prompt".to_string(),
            connect_command: "conn".to_string(),
            structured_on: "set markup csv on".to_string(),
            structured_off: "set markup csv off".to_string(),
            exit_command: "exit".to_string(),
        }
    }
}

impl ShellConfig {
    pub fn login_script(&self) -> Vec<String> {
        DEFAULT_LOGIN_COMMANDS
            .iter()
            .map(|cmd| cmd.to_string())
            .chain(self.login_commands.iter().cloned())
            .collect()
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms.max(1))
    }

    pub fn exec_timeout(&self) -> Option<Duration> {
        (self.exec_timeout_ms > 0).then(|| Duration::from_millis(self.exec_timeout_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub max_start_attempts: u32,
    pub retry_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_start_attempts: 5,
            retry_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            format: "text".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn level_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.level.as_deref().unwrap_or(fallback)
    }
}

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Run the session server in the foreground.
    Serve(ServeArgs),
    /// Ask a running server to shut down.
    Stop(StopArgs),
    /// Run commands through the shared session, starting a server if needed.
    Exec(ExecArgs),
}

#[derive(Debug, Parser, Clone, Default)]
pub struct CommonArgs {
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub socket: Option<String>,
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Parser, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub common: CommonArgs,
    /// Log warnings only.
    #[arg(long)]
    pub nodebug: bool,
}

#[derive(Debug, Parser, Clone)]
pub struct StopArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Debug, Parser, Clone)]
pub struct ExecArgs {
    #[command(flatten)]
    pub common: CommonArgs,
    /// Connection string, e.g. user/password@tnsname.
    #[arg(long)]
    pub conn: String,
    /// One line of input for the shell; repeat for several lines.
    #[arg(long = "sql", required = true, num_args = 1..)]
    pub sql: Vec<String>,
    #[arg(long, value_enum)]
    pub output_format: Option<OutputFormat>,
    #[arg(long)]
    pub debug: bool,
}

impl Config {
    pub fn load(args: &CommonArgs) -> PipeResult<Self> {
        let mut config = match Self::locate(args.config.as_deref()) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env();
        config.apply_cli(args);
        Ok(config)
    }

    fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        let beside_exe = env::current_exe()
            .ok()?
            .parent()?
            .join(CONFIG_FILE_NAME);
        beside_exe.exists().then_some(beside_exe)
    }

    pub fn from_file(path: &Path) -> PipeResult<Self> {
        let content = fs::read_to_string(path).map_err(|err| {
            ApiError::new(ErrorCode::IoError, "Failed to read config file")
                .with_details(format!("{}: {err}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> PipeResult<Self> {
        let parsed: Self = toml::from_str(content).map_err(|err| {
            ApiError::new(ErrorCode::InvalidArgument, "Failed to parse config file")
                .with_details(err.to_string())
        })?;
        Ok(parsed)
    }

    fn apply_env(&mut self) {
        if let Ok(value) = env::var("SQLPIPE_SOCKET") {
            self.server.socket_path = value;
        }
        if let Ok(value) = env::var("SQLPIPE_LOG_LEVEL") {
            self.logging.level = Some(value);
        }
        if let Ok(value) = env::var("SQLPIPE_SHELL") {
            self.shell.program = value;
        }
    }

    fn apply_cli(&mut self, args: &CommonArgs) {
        if let Some(path) = &args.socket {
            self.server.socket_path = path.clone();
        }
        if let Some(level) = &args.log_level {
            self.logging.level = Some(level.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_script_appends_configured_commands_after_defaults() {
        let config = Config::from_toml(
            r#"
[shell]
login_commands = ["set pagesize 100", "alter session set nls_date_format='YYYY-MM-DD'"]
"#,
        )
        .expect("parse");
        let script = config.shell.login_script();
        assert_eq!(script.len(), 6);
        assert_eq!(script[0], "set linesize 512");
        assert_eq!(script[3], "set serveroutput on");
        assert_eq!(script[4], "set pagesize 100");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::from_toml("[client]\nmax_start_attempts = 2\n").expect("parse");
        assert_eq!(config.client.max_start_attempts, 2);
        assert_eq!(config.client.retry_interval_ms, 1_000);
        assert_eq!(config.shell.program, "sqlplus");
        assert_eq!(config.shell.args, vec!["-S", "/nolog"]);
    }

    #[test]
    fn zero_exec_timeout_disables_it() {
        let mut shell = ShellConfig::default();
        assert_eq!(shell.exec_timeout(), Some(Duration::from_secs(600)));
        shell.exec_timeout_ms = 0;
        assert_eq!(shell.exec_timeout(), None);
    }

    #[test]
    fn invalid_toml_is_invalid_argument() {
        let err = Config::from_toml("[shell\nprogram=").expect_err("should fail");
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn cli_socket_overrides_file() {
        let mut config = Config::default();
        config.apply_cli(&CommonArgs {
            config: None,
            socket: Some("/tmp/custom.sock".to_string()),
            log_level: Some("trace".to_string()),
        });
        assert_eq!(config.server.socket_path, "/tmp/custom.sock");
        assert_eq!(config.logging.level_or("warn"), "trace");
    }

    #[test]
    fn unset_level_falls_back_to_subcommand_default() {
        let config = Config::from_toml("[logging]\nformat = \"json\"\n").expect("parse");
        assert_eq!(config.logging.level_or("debug"), "debug");
        let config = Config::from_toml("[logging]\nlevel = \"info\"\n").expect("parse");
        assert_eq!(config.logging.level_or("debug"), "info");
    }
}
