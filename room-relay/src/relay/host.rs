use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::{
    io::BufReader,
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot, watch,
    },
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, info, warn};

use super::{EventSender, RelayEvent, deliver, stopped};
use crate::{
    error::RelayError,
    message::{read_line, write_line},
};

type PeerId = u64;

/// Lines a peer may have queued before it is treated as stalled and dropped.
pub const PEER_QUEUE_DEPTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Starting,
    Listening,
    Running,
    Stopped,
}

/// The listening side of a room.
///
/// Every line read from a peer is broadcast to all connected peers, the
/// sender included, and then delivered once to the host's own event sink.
/// Lines the host types go through [`RelayHost::broadcast`] and take the same
/// path. Lines from different peers may interleave differently at different
/// receivers; there is no ordering guarantee across senders.
///
/// Each peer has at most [`PEER_QUEUE_DEPTH`] lines waiting to be written. A
/// peer that falls that far behind is disconnected.
///
/// Dropping a host without calling [`RelayHost::stop`] still winds down its
/// tasks, but only `stop` waits for them.
pub struct RelayHost {
    local_addr: Option<SocketAddr>,
    shared: Arc<Shared>,
    running: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
}

impl RelayHost {
    /// Binds `address:port` and starts accepting peers.
    ///
    /// A bind failure does not surface here: the host ends up
    /// [`HostState::Stopped`] and a single [`RelayEvent::Failed`] is delivered.
    pub async fn start(address: &str, port: u16, events: EventSender) -> Self {
        let shared = Arc::new(Shared::new(events));
        let (running, running_rx) = watch::channel(true);

        match bind(address, port).await {
            Ok((listener, local_addr)) => {
                shared.set_state(HostState::Listening);
                info!(addr = %local_addr, "relay host listening");
                shared.deliver(RelayEvent::Listening { addr: local_addr });

                let accept_task =
                    tokio::spawn(accept_loop(listener, Arc::clone(&shared), running_rx));
                Self {
                    local_addr: Some(local_addr),
                    shared,
                    running,
                    accept_task: Some(accept_task),
                }
            }
            Err(source) => {
                let err = RelayError::BindFailure {
                    addr: format!("{address}:{port}"),
                    source,
                };
                warn!(error = %err, "relay host failed to start");
                shared.deliver(RelayEvent::Failed {
                    reason: err.to_string(),
                });
                shared.set_state(HostState::Stopped);
                Self {
                    local_addr: None,
                    shared,
                    running,
                    accept_task: None,
                }
            }
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn state(&self) -> HostState {
        *self.shared.state.borrow()
    }

    pub async fn wait_for_state(&self, target: HostState) {
        let mut state = self.shared.state.subscribe();
        let _ = state.wait_for(|state| *state == target).await;
    }

    pub fn peer_count(&self) -> usize {
        self.shared.peers().len()
    }

    /// Sends `line` to every connected peer and then to the host's own sink.
    pub fn broadcast(&self, line: &str) {
        self.shared.broadcast(line);
    }

    /// Closes the listener and every peer connection, then waits for all
    /// workers to finish.
    pub async fn stop(mut self) {
        self.running.send_replace(false);
        if let Some(task) = self.accept_task.take() {
            if let Err(err) = task.await {
                warn!(error = ?err, "relay accept loop ended abnormally");
            }
        }
        self.shared.peers().clear();
        self.shared.set_state(HostState::Stopped);
        info!(addr = ?self.local_addr, "relay host stopped");
    }
}

async fn bind(address: &str, port: u16) -> io::Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind((address, port)).await?;
    let local_addr = listener.local_addr()?;
    Ok((listener, local_addr))
}

struct PeerHandle {
    addr: SocketAddr,
    outbox: mpsc::Sender<Arc<str>>,
    /// Dropped with the handle, which tells the peer's worker to hang up.
    _evict: oneshot::Sender<()>,
}

struct PeerChannels {
    inbox: mpsc::Receiver<Arc<str>>,
    evicted: oneshot::Receiver<()>,
}

/// State shared between the host handle, its accept loop and the peer workers.
struct Shared {
    peers: Mutex<HashMap<PeerId, PeerHandle>>,
    next_id: AtomicU64,
    events: EventSender,
    state: watch::Sender<HostState>,
}

impl Shared {
    fn new(events: EventSender) -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            events,
            state: watch::channel(HostState::Starting).0,
        }
    }

    fn peers(&self) -> MutexGuard<'_, HashMap<PeerId, PeerHandle>> {
        self.peers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: HostState) {
        self.state.send_replace(state);
    }

    fn deliver(&self, event: RelayEvent) {
        deliver(&self.events, event);
    }

    fn add_peer(&self, addr: SocketAddr) -> (PeerId, PeerChannels) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbox, inbox) = mpsc::channel(PEER_QUEUE_DEPTH);
        let (evict, evicted) = oneshot::channel();
        self.peers().insert(
            id,
            PeerHandle {
                addr,
                outbox,
                _evict: evict,
            },
        );
        (id, PeerChannels { inbox, evicted })
    }

    fn remove_peer(&self, id: PeerId) {
        if let Some(peer) = self.peers().remove(&id) {
            debug!(peer = %peer.addr, "peer removed from room");
        }
    }

    fn broadcast(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        let line: Arc<str> = Arc::from(line);

        // Delivering under the lock keeps the host sink in the same order the
        // peers' queues see.
        let mut peers = self.peers();
        peers.retain(|_, peer| match peer.outbox.try_send(Arc::clone(&line)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(peer = %peer.addr, "dropping peer that stopped reading");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(peer = %peer.addr, "dropping dead peer during broadcast");
                false
            }
        });
        self.deliver(RelayEvent::Message(line.to_string()));
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut running: watch::Receiver<bool>,
) {
    let mut workers = JoinSet::new();
    shared.set_state(HostState::Running);

    loop {
        select! {
            _ = stopped(&mut running) => break,
            accept_result = listener.accept() => match accept_result {
                Ok((stream, addr)) => {
                    let (id, channels) = shared.add_peer(addr);
                    info!(peer = %addr, "peer joined room");
                    workers.spawn(serve_peer(
                        id,
                        addr,
                        stream,
                        channels,
                        Arc::clone(&shared),
                        running.clone(),
                    ));
                }
                Err(err) => warn!(error = ?err, "failed to accept peer"),
            },
            Some(joined) = workers.join_next(), if !workers.is_empty() => {
                if let Err(err) = joined {
                    warn!(error = ?err, "peer worker ended abnormally");
                }
            }
        }
    }

    drop(listener);
    while let Some(joined) = workers.join_next().await {
        if let Err(err) = joined {
            warn!(error = ?err, "peer worker ended abnormally");
        }
    }
    shared.set_state(HostState::Stopped);
}

async fn serve_peer(
    id: PeerId,
    addr: SocketAddr,
    stream: TcpStream,
    channels: PeerChannels,
    shared: Arc<Shared>,
    mut running: watch::Receiver<bool>,
) {
    let PeerChannels { inbox, evicted } = channels;
    let (reader, writer) = stream.into_split();
    let writer_task = tokio::spawn(write_to_peer(id, addr, writer, inbox, Arc::clone(&shared)));

    // A peer evicted by a broadcast may be blocked in a write that will never
    // finish, so its writer is aborted like on host stop.
    let hang_up = select! {
        stopping = read_from_peer(addr, reader, &shared, &mut running) => stopping,
        _ = evicted => true,
    };
    shared.remove_peer(id);

    if hang_up {
        writer_task.abort();
    }
    let _ = writer_task.await;
    info!(peer = %addr, "peer left room");
}

/// Relays the peer's lines until it disconnects or the host stops. Returns
/// whether the host is stopping.
async fn read_from_peer(
    addr: SocketAddr,
    reader: OwnedReadHalf,
    shared: &Shared,
    running: &mut watch::Receiver<bool>,
) -> bool {
    let mut reader = BufReader::new(reader);
    loop {
        let line = select! {
            _ = stopped(running) => return true,
            line = read_line(&mut reader) => line,
        };
        match line {
            Ok(Some(line)) => shared.broadcast(&line),
            Ok(None) => {
                debug!(peer = %addr, error = %RelayError::PeerDisconnected, "closing peer");
                return false;
            }
            Err(err) => {
                debug!(peer = %addr, error = %err, "peer read failed");
                return false;
            }
        }
    }
}

async fn write_to_peer(
    id: PeerId,
    addr: SocketAddr,
    mut writer: OwnedWriteHalf,
    mut inbox: mpsc::Receiver<Arc<str>>,
    shared: Arc<Shared>,
) {
    while let Some(line) = inbox.recv().await {
        if let Err(err) = write_line(&mut writer, &line).await {
            debug!(peer = %addr, error = ?err, "write to peer failed");
            shared.remove_peer(id);
            return;
        }
    }
}
