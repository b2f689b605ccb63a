use crate::config::Config;
use crate::error::{ApiError, ErrorCode, PipeResult};
use crate::protocol::{Reply, Request};
use crate::transport::Connection;
use std::fs::OpenOptions;
use std::future::Future;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.client.max_start_attempts,
            interval: Duration::from_millis(config.client.retry_interval_ms),
        }
    }
}

pub trait ServerLauncher {
    fn launch(&self) -> PipeResult<()>;
}

#[derive(Debug, Clone)]
pub struct DetachedLauncher {
    program: PathBuf,
    args: Vec<String>,
    log_file: Option<PathBuf>,
}

impl DetachedLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            log_file: None,
        }
    }

    pub fn current_exe(
        config: &Config,
        config_path: Option<&Path>,
        debug: bool,
    ) -> PipeResult<Self> {
        let program = std::env::current_exe().map_err(|err| {
            ApiError::new(ErrorCode::ProcessLaunch, "Cannot locate own executable")
                .with_details(err.to_string())
        })?;
        let mut args = vec![
            "serve".to_string(),
            "--socket".to_string(),
            config.server.socket_path.clone(),
        ];
        if let Some(path) = config_path {
            args.push("--config".to_string());
            args.push(path.display().to_string());
        }
        if !debug {
            args.push("--nodebug".to_string());
        }
        let mut launcher = Self::new(program, args);
        if !config.server.log_file.is_empty() {
            launcher.log_file = Some(PathBuf::from(&config.server.log_file));
        }
        Ok(launcher)
    }

    fn stderr(&self) -> Stdio {
        let Some(path) = &self.log_file else {
            return Stdio::null();
        };
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Stdio::from(file),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Cannot open server log");
                Stdio::null()
            }
        }
    }
}

impl ServerLauncher for DetachedLauncher {
    fn launch(&self) -> PipeResult<()> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(self.stderr());
        // SAFETY: setsid is async-signal-safe and touches no parent state.
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        let child = command.spawn().map_err(|err| {
            ApiError::new(ErrorCode::ProcessLaunch, "Failed to start server")
                .with_details(format!("{}: {err}", self.program.display()))
        })?;
        tracing::debug!(pid = child.id(), "Server launched");
        Ok(())
    }
}

/// Connects, launching the server after the first failed attempt and then
/// retrying at a fixed interval. Makes at most `1 + policy.max_retries`
/// attempts.
pub async fn connect_with_bootstrap<T, C, Fut>(
    mut connect: C,
    launcher: &dyn ServerLauncher,
    policy: &RetryPolicy,
) -> PipeResult<T>
where
    C: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let err = match connect().await {
            Ok(conn) => {
                tracing::debug!(attempts, "Connected to server");
                return Ok(conn);
            }
            Err(err) => err,
        };

        if attempts == 1 {
            tracing::debug!(error = %err, "Server not found; starting a new instance");
            launcher.launch()?;
        }
        if attempts > policy.max_retries {
            return Err(ApiError::new(ErrorCode::ServerUnavailable, "Unable to reach server")
                .with_details(format!("gave up after {attempts} attempts: {err}"))
                .into());
        }
        tracing::debug!(attempts, error = %err, "Waiting for server");
        tokio::time::sleep(policy.interval).await;
    }
}

pub struct Client {
    conn: Connection,
}

impl Client {
    pub async fn connect(config: &Config, launcher: &dyn ServerLauncher) -> PipeResult<Self> {
        let path = config.server.socket_path.clone();
        let conn = connect_with_bootstrap(
            || Connection::connect(path.clone()),
            launcher,
            &RetryPolicy::from_config(config),
        )
        .await?;
        Ok(Self { conn })
    }

    pub async fn connect_existing(path: impl AsRef<Path>) -> Option<Self> {
        Connection::connect(path).await.ok().map(|conn| Self { conn })
    }

    pub async fn send_request(&mut self, request: &Request) -> PipeResult<String> {
        self.conn.send(request).await?;
        let reply: Reply = self.conn.receive().await?.ok_or_else(|| {
            ApiError::new(ErrorCode::Transport, "Server closed the connection without replying")
        })?;
        reply.into_result()
    }

    pub async fn stop(mut self) -> PipeResult<()> {
        self.conn.send(&Request::shutdown()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingLauncher {
        launches: AtomicU32,
    }

    impl ServerLauncher for CountingLauncher {
        fn launch(&self) -> PipeResult<()> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingLauncher;

    impl ServerLauncher for FailingLauncher {
        fn launch(&self) -> PipeResult<()> {
            Err(ApiError::new(ErrorCode::ProcessLaunch, "no binary").into())
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            interval: Duration::from_millis(1),
        }
    }

    fn refused() -> std::io::Error {
        std::io::Error::from(std::io::ErrorKind::ConnectionRefused)
    }

    #[tokio::test]
    async fn unreachable_server_exhausts_attempts_after_one_launch() {
        let launcher = CountingLauncher::default();
        let attempts = AtomicU32::new(0);
        let result: PipeResult<()> = connect_with_bootstrap(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(refused()) }
            },
            &launcher,
            &policy(5),
        )
        .await;

        let err = result.expect_err("should give up");
        assert_eq!(err.code(), ErrorCode::ServerUnavailable);
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn running_server_is_used_without_launching() {
        let launcher = CountingLauncher::default();
        let value = connect_with_bootstrap(|| async { Ok(42) }, &launcher, &policy(5))
            .await
            .expect("connect");
        assert_eq!(value, 42);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn server_coming_up_later_is_reached() {
        let launcher = CountingLauncher::default();
        let attempts = AtomicU32::new(0);
        let value = connect_with_bootstrap(
            || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move { if attempt < 3 { Err(refused()) } else { Ok(attempt) } }
            },
            &launcher,
            &policy(5),
        )
        .await
        .expect("connect");
        assert_eq!(value, 3);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn launch_failure_is_returned() {
        let result: PipeResult<()> =
            connect_with_bootstrap(|| async { Err(refused()) }, &FailingLauncher, &policy(5)).await;
        assert_eq!(result.expect_err("launch fails").code(), ErrorCode::ProcessLaunch);
    }

    #[tokio::test]
    async fn connect_existing_without_server_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(Client::connect_existing(dir.path().join("none.sock")).await.is_none());
    }
}
