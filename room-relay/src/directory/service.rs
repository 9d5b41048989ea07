use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream, ToSocketAddrs},
    select,
    sync::oneshot,
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    error::{RelayError, Result},
    message::{DirectoryRequest, DirectoryResponse, MAX_REQUEST_BYTES, read_request, write_json},
    registry::Registry,
};

/// How long an accepted connection may stay silent before it is dropped.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// One-shot request/response listener in front of a [`Registry`].
///
/// Each accepted connection carries exactly one request, read with a single
/// bounded read, and receives exactly one response before it is closed.
pub struct DirectoryService {
    listener: TcpListener,
    registry: Arc<Registry>,
    request_timeout: Duration,
}

impl DirectoryService {
    pub fn new(listener: TcpListener, registry: Arc<Registry>) -> Self {
        Self {
            listener,
            registry,
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    /// Binds `addr` and serves a fresh, empty registry.
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::new(listener, Arc::new(Registry::new())))
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let DirectoryService {
            listener,
            registry,
            request_timeout,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!(rooms = registry.len(), "directory shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &registry, request_timeout);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

/// A directory served in the background of a chat process.
///
/// Every chat process offers to serve the well-known directory address. The
/// first one to bind it serves everyone; the rest find it taken and use it.
/// The directory lives as long as the process that won the bind.
pub struct EmbeddedDirectory {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl EmbeddedDirectory {
    /// Serves the directory on `addr` unless something already holds it.
    pub async fn try_start(addr: SocketAddr) -> Option<Self> {
        let service = match DirectoryService::bind(addr).await {
            Ok(service) => service,
            Err(err) => {
                debug!(%addr, error = %err, "directory already served elsewhere");
                return None;
            }
        };
        let addr = match service.local_addr() {
            Ok(addr) => addr,
            Err(err) => {
                warn!(error = ?err, "embedded directory has no local address");
                return None;
            }
        };
        info!(%addr, "serving room directory in-process");

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            if let Err(err) = service.run_until(shutdown).await {
                warn!(error = ?err, "embedded directory exited with error");
            }
        });
        Some(Self {
            addr,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.task.await {
            warn!(error = ?err, "embedded directory ended abnormally");
        }
    }
}

fn handle_accept_result(
    result: io::Result<(TcpStream, SocketAddr)>,
    registry: &Arc<Registry>,
    request_timeout: Duration,
) {
    match result {
        Ok((stream, peer)) => spawn_request_handler(stream, peer, registry, request_timeout),
        Err(err) => warn!(error = ?err, "failed to accept directory connection"),
    }
}

fn spawn_request_handler(
    stream: TcpStream,
    peer: SocketAddr,
    registry: &Arc<Registry>,
    request_timeout: Duration,
) {
    let registry = Arc::clone(registry);
    tokio::spawn(async move {
        match timeout(request_timeout, handle_connection(stream, &registry)).await {
            Ok(Ok(())) => {}
            Ok(Err(RelayError::MalformedMessage(reason))) => {
                debug!(peer = %peer, %reason, "dropping malformed directory request");
            }
            Ok(Err(err)) => warn!(peer = %peer, error = ?err, "directory request failed"),
            Err(_) => debug!(peer = %peer, "dropping silent directory connection"),
        }
    });
}

async fn handle_connection(stream: TcpStream, registry: &Registry) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    let Some(request) = read_request::<_, DirectoryRequest>(&mut reader, MAX_REQUEST_BYTES).await?
    else {
        debug!("directory connection closed before a request arrived");
        return Ok(());
    };

    let response = apply_request(registry, request);
    write_json(&mut writer, &response).await?;
    writer.shutdown().await?;
    Ok(())
}

/// Executes one decoded request against the registry.
pub fn apply_request(registry: &Registry, request: DirectoryRequest) -> DirectoryResponse {
    match request {
        DirectoryRequest::Register {
            room_name,
            host_ip,
            host_port,
            password,
        } => {
            info!(room = %room_name, %host_ip, host_port, "room registered");
            registry.register(room_name, host_ip, host_port, password);
            DirectoryResponse::ok()
        }
        DirectoryRequest::Unregister { room_name } => {
            if registry.unregister(&room_name).is_some() {
                info!(room = %room_name, "room unregistered");
            }
            DirectoryResponse::ok()
        }
        DirectoryRequest::List => DirectoryResponse::Rooms {
            rooms: registry.snapshot(),
        },
    }
}
