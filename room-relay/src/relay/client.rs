use std::{io, net::SocketAddr, sync::Arc};

use tokio::{
    io::BufReader,
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::{EventSender, RelayEvent, deliver, stopped};
use crate::{
    error::RelayError,
    message::{read_line, write_line},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    Connected,
    Reading,
    Disconnected,
}

/// A peer's connection to a [`RelayHost`](super::RelayHost).
pub struct RelayClient {
    peer_addr: Option<SocketAddr>,
    outbox: Option<mpsc::UnboundedSender<String>>,
    state: Arc<watch::Sender<ClientState>>,
    running: watch::Sender<bool>,
    session: Option<JoinHandle<()>>,
}

impl RelayClient {
    /// Connects to `address:port` and starts delivering the host's lines.
    ///
    /// A failed connection is reported once through `events` as
    /// [`RelayEvent::Failed`] and leaves the client
    /// [`ClientState::Disconnected`]; it is not returned as an error.
    pub async fn connect(address: &str, port: u16, events: EventSender) -> Self {
        let state = Arc::new(watch::channel(ClientState::Connecting).0);
        let (running, running_rx) = watch::channel(true);

        let (stream, peer_addr) = match dial(address, port).await {
            Ok(connected) => connected,
            Err(source) => {
                let err = RelayError::ConnectFailure {
                    addr: format!("{address}:{port}"),
                    source,
                };
                warn!(error = %err, "relay client failed to connect");
                deliver(&events, RelayEvent::Failed {
                    reason: err.to_string(),
                });
                state.send_replace(ClientState::Disconnected);
                return Self {
                    peer_addr: None,
                    outbox: None,
                    state,
                    running,
                    session: None,
                };
            }
        };

        state.send_replace(ClientState::Connected);
        info!(host = %peer_addr, "connected to relay host");
        deliver(&events, RelayEvent::Connected { addr: peer_addr });

        let (reader, writer) = stream.into_split();
        let (outbox, inbox) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_to_host(writer, inbox));

        state.send_replace(ClientState::Reading);
        let session = tokio::spawn(read_from_host(
            reader,
            writer_task,
            events,
            Arc::clone(&state),
            running_rx,
        ));

        Self {
            peer_addr: Some(peer_addr),
            outbox: Some(outbox),
            state,
            running,
            session: Some(session),
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Resolves once the connection to the host is gone.
    pub async fn wait_disconnected(&self) {
        let mut state = self.state.subscribe();
        let _ = state
            .wait_for(|state| *state == ClientState::Disconnected)
            .await;
    }

    /// Queues `line` for the host. Never fails: once the connection is gone
    /// the line is dropped and the disconnect shows up on the event sink.
    pub fn send(&self, line: &str) {
        let Some(outbox) = &self.outbox else {
            debug!("dropping line, relay client never connected");
            return;
        };
        if outbox.send(line.to_string()).is_err() {
            debug!("dropping line, relay connection closed");
        }
    }

    /// Closes the connection and waits for the read loop to finish.
    pub async fn stop(mut self) {
        self.running.send_replace(false);
        self.outbox = None;
        if let Some(session) = self.session.take() {
            if let Err(err) = session.await {
                warn!(error = ?err, "relay read loop ended abnormally");
            }
        }
        self.state.send_replace(ClientState::Disconnected);
    }
}

async fn dial(address: &str, port: u16) -> io::Result<(TcpStream, SocketAddr)> {
    let stream = TcpStream::connect((address, port)).await?;
    let peer_addr = stream.peer_addr()?;
    Ok((stream, peer_addr))
}

async fn read_from_host(
    reader: OwnedReadHalf,
    writer_task: JoinHandle<()>,
    events: EventSender,
    state: Arc<watch::Sender<ClientState>>,
    mut running: watch::Receiver<bool>,
) {
    let mut reader = BufReader::new(reader);
    loop {
        let line = select! {
            _ = stopped(&mut running) => break,
            line = read_line(&mut reader) => line,
        };
        match line {
            Ok(Some(line)) => deliver(&events, RelayEvent::Message(line)),
            Ok(None) => {
                debug!(error = %RelayError::PeerDisconnected, "relay host closed the connection");
                break;
            }
            Err(err) => {
                debug!(error = %err, "relay read failed");
                break;
            }
        }
    }

    // Dropping both halves closes the socket.
    writer_task.abort();
    let _ = writer_task.await;
    drop(reader);

    state.send_replace(ClientState::Disconnected);
    deliver(&events, RelayEvent::Disconnected);
}

async fn write_to_host(mut writer: OwnedWriteHalf, mut inbox: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = inbox.recv().await {
        if let Err(err) = write_line(&mut writer, &line).await {
            debug!(error = ?err, "write to relay host failed");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn refused_connection_reports_once_and_disconnects() {
        let vacant = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = vacant.local_addr().expect("addr").port();
        drop(vacant);

        let (events, mut sink) = mpsc::unbounded_channel();
        let client = RelayClient::connect("127.0.0.1", port, events).await;

        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(matches!(sink.recv().await, Some(RelayEvent::Failed { .. })));

        client.send("nobody is listening");
        client.stop().await;
        assert!(sink.recv().await.is_none(), "no further events after failure");
    }
}
