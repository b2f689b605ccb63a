use crate::config::ShellConfig;
use crate::error::{ApiError, ErrorCode, PipeResult};
use crate::framing::{OutputFramer, RECONNECT_REQUEST_ID, RequestId};
use crate::protocol::{Request, mask_credentials, needs_reconnect};
use crate::shell::{ShellBackend, wait_for_ready};
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Output(String),
    Shutdown,
}

pub struct SessionManager {
    shell: Box<dyn ShellBackend>,
    framer: Box<dyn OutputFramer>,
    config: ShellConfig,
    login_script: Vec<String>,
    current_target: String,
    sequence: RequestId,
}

impl SessionManager {
    pub async fn start(
        mut shell: Box<dyn ShellBackend>,
        framer: Box<dyn OutputFramer>,
        config: ShellConfig,
    ) -> PipeResult<Self> {
        if !config.ready_probe.is_empty() {
            shell.write_line(&config.ready_probe).await?;
        }
        let ready = timeout(
            config.startup_timeout(),
            wait_for_ready(shell.as_mut(), &config.ready_marker),
        )
        .await
        .map_err(|_| {
            ApiError::new(
                ErrorCode::SessionReadyTimeout,
                "Shell did not report readiness in time",
            )
            .with_details(format!(
                "waited {} ms for {:?}",
                config.startup_timeout_ms, config.ready_marker
            ))
        })??;
        if !ready {
            return Err(ApiError::new(
                ErrorCode::SessionReadyTimeout,
                "Shell exited before reporting readiness",
            )
            .with_details(format!("expected {:?}", config.ready_marker))
            .into());
        }
        tracing::info!(program = %config.program, "Shell session ready");

        let login_script = config.login_script();
        Ok(Self {
            shell,
            framer,
            config,
            login_script,
            current_target: String::new(),
            sequence: 0,
        })
    }

    pub fn current_target(&self) -> &str {
        &self.current_target
    }

    pub fn sequence(&self) -> RequestId {
        self.sequence
    }

    pub async fn handle(&mut self, request: &Request) -> PipeResult<Outcome> {
        if request.is_shutdown() {
            tracing::info!("Shutdown requested");
            return Ok(Outcome::Shutdown);
        }

        if needs_reconnect(&self.current_target, &request.target) {
            self.reconnect(&request.target).await?;
        }

        self.sequence += 1;
        let request_id = self.sequence;
        let commands = if request.is_query_shape {
            let mut wrapped = Vec::with_capacity(request.command_lines.len() + 2);
            wrapped.push(self.config.structured_on.clone());
            wrapped.extend(request.command_lines.iter().cloned());
            wrapped.push(self.config.structured_off.clone());
            wrapped
        } else {
            request.command_lines.clone()
        };

        tracing::debug!(
            request_id,
            query = request.is_query_shape,
            commands = ?request.command_lines,
            "Executing"
        );
        let output = self.run_batch(&commands, request_id).await?;
        tracing::debug!(request_id, bytes = output.len(), "Captured output");
        Ok(Outcome::Output(output))
    }

    async fn reconnect(&mut self, target: &str) -> PipeResult<()> {
        tracing::info!(conn = %mask_credentials(target), "Reconnecting");
        // Recorded before submitting so a failed batch is not retried under the old target.
        self.current_target = target.to_string();

        let mut commands = Vec::with_capacity(self.login_script.len() + 1);
        commands.push(format!("{} {}", self.config.connect_command, target));
        commands.extend(self.login_script.iter().cloned());

        let discarded = self.run_batch(&commands, RECONNECT_REQUEST_ID).await?;
        tracing::trace!(output = %discarded, "Reconnect output");
        Ok(())
    }

    async fn run_batch(
        &mut self,
        commands: &[String],
        request_id: RequestId,
    ) -> PipeResult<String> {
        self.framer
            .submit(self.shell.as_mut(), commands, request_id)
            .await?;
        let capture = self.framer.capture(self.shell.as_mut(), request_id);
        match self.config.exec_timeout() {
            Some(limit) => timeout(limit, capture)
                .await
                .map_err(|_| exec_timeout(request_id, limit))?,
            None => capture.await,
        }
    }

    pub async fn shutdown(mut self) -> PipeResult<()> {
        self.shell.close().await
    }
}

fn exec_timeout(request_id: RequestId, limit: Duration) -> ApiError {
    ApiError::new(ErrorCode::ExecTimeout, "Shell did not finish the command in time")
        .with_details(format!("request {request_id}, limit {} ms", limit.as_millis()))
}
