use crate::error::{ApiError, ErrorCode, PipeError, PipeResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};

pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

pub struct Endpoint {
    listener: UnixListener,
    path: PathBuf,
}

impl Endpoint {
    pub async fn bind(path: impl AsRef<Path>) -> PipeResult<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            if UnixStream::connect(&path).await.is_ok() {
                return Err(ApiError::new(
                    ErrorCode::AddressInUse,
                    "Another server is already listening",
                )
                .with_details(path.display().to_string())
                .into());
            }
            tracing::debug!(path = %path.display(), "Removing stale socket");
            let _ = std::fs::remove_file(&path);
        }
        let listener = UnixListener::bind(&path).map_err(|err| {
            let code = if err.kind() == ErrorKind::AddrInUse {
                ErrorCode::AddressInUse
            } else {
                ErrorCode::Transport
            };
            ApiError::new(code, "Failed to bind socket")
                .with_details(format!("{}: {err}", path.display()))
        })?;
        tracing::info!(path = %path.display(), "Listening");
        Ok(Self { listener, path })
    }

    pub async fn accept(&self) -> PipeResult<Connection> {
        let (stream, _) = self.listener.accept().await.map_err(|err| {
            ApiError::new(ErrorCode::Transport, "Failed to accept connection")
                .with_details(err.to_string())
        })?;
        Ok(Connection::new(stream, Some(MAX_REQUEST_BYTES)))
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path)
            && err.kind() != ErrorKind::NotFound
        {
            tracing::warn!(path = %self.path.display(), error = %err, "Failed to remove socket");
        }
    }
}

pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    max_line: Option<usize>,
}

impl Connection {
    fn new(stream: UnixStream, max_line: Option<usize>) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
            max_line,
        }
    }

    /// Client side; replies carry query output and are not size-capped.
    pub async fn connect(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self::new(stream, None))
    }

    pub async fn receive<T: DeserializeOwned>(&mut self) -> PipeResult<Option<T>> {
        loop {
            let Some(raw) = self.read_line().await? else {
                return Ok(None);
            };
            let line = std::str::from_utf8(&raw).map_err(|err| malformed(err.to_string()))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return serde_json::from_str(line)
                .map(Some)
                .map_err(|err| malformed(err.to_string()));
        }
    }

    async fn read_line(&mut self) -> PipeResult<Option<Vec<u8>>> {
        let mut buf = Vec::new();
        let read = match self.max_line {
            // One byte past the cap tells an oversized line from one that just fits.
            Some(limit) => {
                (&mut self.reader)
                    .take(limit as u64 + 1)
                    .read_until(b'\n', &mut buf)
                    .await
            }
            None => self.reader.read_until(b'\n', &mut buf).await,
        }
        .map_err(|err| {
            ApiError::new(ErrorCode::Transport, "Socket read failed").with_details(err.to_string())
        })?;
        if read == 0 {
            return Ok(None);
        }
        let body = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
        if let Some(limit) = self.max_line
            && body.len() > limit
        {
            return Err(malformed(format!("message exceeds {limit} bytes")));
        }
        Ok(Some(buf))
    }

    pub async fn send<T: Serialize>(&mut self, message: &T) -> PipeResult<()> {
        let mut payload = serde_json::to_vec(message)?;
        payload.push(b'\n');
        self.writer.write_all(&payload).await.map_err(write_error)?;
        self.writer.flush().await.map_err(write_error)?;
        Ok(())
    }
}

fn malformed(details: String) -> PipeError {
    ApiError::new(ErrorCode::MalformedRequest, "Malformed message")
        .with_details(details)
        .into()
}

fn write_error(err: std::io::Error) -> PipeError {
    ApiError::new(ErrorCode::Transport, "Socket write failed")
        .with_details(err.to_string())
        .into()
}
