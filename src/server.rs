use crate::config::Config;
use crate::error::{ErrorCode, PipeError, PipeResult};
use crate::framing::SentinelFramer;
use crate::protocol::{Reply, Request};
use crate::session::{Outcome, SessionManager};
use crate::shell::ShellProcess;
use crate::transport::{Connection, Endpoint};
use std::fmt;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Starting,
    Ready,
    Serving,
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Starting => "starting",
            ServerState::Ready => "ready",
            ServerState::Serving => "serving",
            ServerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

enum Flow {
    Continue,
    Stop,
}

pub struct Server {
    endpoint: Endpoint,
    session: SessionManager,
    state: watch::Sender<ServerState>,
}

impl Server {
    pub async fn start(config: &Config) -> PipeResult<Self> {
        tracing::info!(state = %ServerState::Starting, "Server starting");
        let endpoint = Endpoint::bind(&config.server.socket_path).await?;
        let shell = ShellProcess::spawn(&config.shell)?;
        let session = SessionManager::start(
            Box::new(shell),
            Box::new(SentinelFramer::from_config(&config.shell)),
            config.shell.clone(),
        )
        .await?;
        Ok(Self::new(endpoint, session))
    }

    pub fn new(endpoint: Endpoint, session: SessionManager) -> Self {
        let (state, _) = watch::channel(ServerState::Starting);
        Self {
            endpoint,
            session,
            state,
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    fn transition(&mut self, next: ServerState) {
        let from = self.state();
        if from != next {
            tracing::debug!(from = %from, to = %next, "Server state");
            self.state.send_replace(next);
        }
    }

    pub async fn run(mut self) -> PipeResult<()> {
        let result = loop {
            self.transition(ServerState::Ready);
            let mut conn = match self.endpoint.accept().await {
                Ok(conn) => conn,
                Err(err) => {
                    tracing::error!(error = %err, "Accept failed; stopping server");
                    break Err(err);
                }
            };
            tracing::debug!("Client connected");
            self.transition(ServerState::Serving);

            match self.serve_connection(&mut conn).await {
                Ok(Flow::Continue) => tracing::debug!("Client disconnected"),
                Ok(Flow::Stop) => break Ok(()),
                Err(err) if err.is_fatal() => {
                    tracing::error!(error = %err, "Shell session lost; stopping server");
                    break Err(err);
                }
                Err(err) => tracing::warn!(error = %err, "Connection dropped"),
            }
        };

        self.transition(ServerState::Stopped);
        let Self {
            endpoint, session, ..
        } = self;
        drop(endpoint);
        if let Err(err) = session.shutdown().await {
            tracing::warn!(error = %err, "Shell did not shut down cleanly");
        }
        tracing::info!("Server stopped");
        result
    }

    async fn serve_connection(&mut self, conn: &mut Connection) -> PipeResult<Flow> {
        loop {
            let request = match conn.receive::<Request>().await {
                Ok(Some(request)) => request,
                Ok(None) => return Ok(Flow::Continue),
                Err(err) => {
                    if err.code() == ErrorCode::MalformedRequest {
                        let _ = conn.send(&Reply::from_error(&err)).await;
                    }
                    return Err(err);
                }
            };

            match self.session.handle(&request).await {
                Ok(Outcome::Shutdown) => return Ok(Flow::Stop),
                Ok(Outcome::Output(output)) => conn.send(&Reply::ok(output)).await?,
                Err(err) => {
                    let sent = conn.send(&Reply::from_error(&err)).await;
                    if err.is_fatal() {
                        return Err(err);
                    }
                    tracing::warn!(error = %err, "Request failed");
                    sent?;
                }
            }
        }
    }
}

pub async fn serve(config: &Config) -> PipeResult<()> {
    let server = Server::start(config).await.inspect_err(|err: &PipeError| {
        tracing::error!(error = %err, "Server failed to start");
    })?;
    server.run().await
}
