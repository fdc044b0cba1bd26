use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use futures::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use crate::models::CoreError;
use crate::rpc::{ControlMethods, handle_line};

pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;
const SOCKET_MODE: u32 = 0o600;

/// Serves the control plane on a Unix domain socket, one task per
/// connection, requests on a connection answered in order.
pub struct ControlServer {
    socket_path: PathBuf,
    methods: ControlMethods,
}

impl ControlServer {
    pub fn new(socket_path: impl Into<PathBuf>, methods: ControlMethods) -> Self {
        Self {
            socket_path: socket_path.into(),
            methods,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Replaces any stale socket file and binds with owner-only permissions.
    pub fn bind(&self) -> Result<UnixListener, CoreError> {
        match fs::remove_file(&self.socket_path) {
            Ok(()) => tracing::debug!(socket = %self.socket_path.display(), "removed stale socket"),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => return Err(CoreError::io("remove stale socket", error)),
        }
        if let Some(parent) = self
            .socket_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            fs::create_dir_all(parent)
                .map_err(|error| CoreError::io("create socket directory", error))?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|error| CoreError::io("bind control socket", error))?;
        fs::set_permissions(&self.socket_path, fs::Permissions::from_mode(SOCKET_MODE))
            .map_err(|error| CoreError::io("set socket permissions", error))?;
        Ok(listener)
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), CoreError> {
        let listener = self.bind()?;
        self.serve(listener, shutdown).await;
        Ok(())
    }

    /// Accepts until `shutdown` fires, then drains connections and removes
    /// the socket file.
    pub async fn serve(&self, listener: UnixListener, shutdown: CancellationToken) {
        tracing::info!(socket = %self.socket_path.display(), "control server listening");
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        connections.spawn(serve_connection(
                            self.methods.clone(),
                            stream,
                            shutdown.child_token(),
                        ));
                    }
                    Err(error) => {
                        tracing::warn!(error = %error, "failed to accept control connection");
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    match joined {
                        Err(error) if error.is_panic() => {
                            tracing::error!(error = %error, "control connection task panicked");
                        }
                        _ => {}
                    }
                }
            }
        }

        while connections.join_next().await.is_some() {}
        drop(listener);
        match fs::remove_file(&self.socket_path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => {
                tracing::warn!(error = %error, "failed to remove control socket");
            }
            _ => {}
        }
        tracing::info!("control server stopped");
    }
}

async fn serve_connection(
    methods: ControlMethods,
    stream: UnixStream,
    cancellation: CancellationToken,
) {
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_BYTES));

    loop {
        let frame = tokio::select! {
            _ = cancellation.cancelled() => break,
            frame = framed.next() => frame,
        };
        let line = match frame {
            None => break,
            Some(Ok(line)) => line,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                tracing::warn!(limit = MAX_LINE_BYTES, "request line too long; closing connection");
                break;
            }
            Some(Err(LinesCodecError::Io(error))) => {
                tracing::debug!(error = %error, "control connection read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(&methods, &line, &cancellation).await;
        if let Err(error) = framed.send(response.to_string()).await {
            tracing::debug!(error = %error, "control connection write failed");
            break;
        }
    }
}
