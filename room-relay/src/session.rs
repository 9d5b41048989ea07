//! Room lifecycles built from the directory client and the relay.
//!
//! Hosting a room starts a [`RelayHost`] and advertises it; joining a room
//! checks the shared password against the directory listing and connects a
//! [`RelayClient`]. Either way the owner ends up with a [`Session`].

use std::ops::RangeInclusive;

use rand::Rng;
use tracing::{info, warn};

use crate::{
    directory::{DirectoryClient, RoomListing},
    error::{RelayError, Result},
    relay::{EventSender, RelayClient, RelayHost},
};

/// Ports a new room picks from when none is requested.
pub const ROOM_PORT_RANGE: RangeInclusive<u16> = 6000..=7000;

pub fn pick_room_port() -> u16 {
    rand::thread_rng().gen_range(ROOM_PORT_RANGE)
}

/// Formats a chat line the way every participant renders it.
pub fn chat_line(nickname: &str, text: &str) -> String {
    format!("{nickname}: {text}")
}

#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub name: String,
    pub password: Option<String>,
    /// Interface the relay listens on.
    pub bind_ip: String,
    /// Address peers are told to connect to.
    pub advertise_ip: String,
    /// `None` picks a port from [`ROOM_PORT_RANGE`].
    pub port: Option<u16>,
}

impl RoomConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: None,
            bind_ip: "127.0.0.1".to_string(),
            advertise_ip: "127.0.0.1".to_string(),
            port: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

/// A room this process is hosting and advertising.
pub struct HostedRoom {
    name: String,
    host: RelayHost,
    directory: DirectoryClient,
    advertised: bool,
}

impl HostedRoom {
    /// Starts the relay and, once it is listening, registers the room.
    ///
    /// If the relay cannot bind, the failure has already been delivered to
    /// `events` and nothing is registered.
    pub async fn create(directory: DirectoryClient, config: RoomConfig, events: EventSender) -> Self {
        let port = config.port.unwrap_or_else(pick_room_port);
        let host = RelayHost::start(&config.bind_ip, port, events).await;

        let advertised = match host.local_addr() {
            None => {
                warn!(room = %config.name, "room not advertised, relay did not start");
                false
            }
            Some(local_addr) => {
                directory
                    .register_room(
                        &config.name,
                        &config.advertise_ip,
                        local_addr.port(),
                        config.password.as_deref(),
                    )
                    .await;
                info!(room = %config.name, port = local_addr.port(), "room created");
                true
            }
        };

        Self {
            name: config.name,
            host,
            directory,
            advertised,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &RelayHost {
        &self.host
    }

    /// Withdraws the room from the directory and shuts the relay down.
    pub async fn close(self) {
        if self.advertised {
            self.directory.unregister_room(&self.name).await;
        }
        self.host.stop().await;
        info!(room = %self.name, "room closed");
    }
}

/// Connects to a listed room after checking the shared password.
pub async fn join_room(
    listing: &RoomListing,
    password: Option<&str>,
    events: EventSender,
) -> Result<RelayClient> {
    if !listing.admits(password) {
        return Err(RelayError::PasswordRejected {
            room: listing.name.clone(),
        });
    }
    info!(room = %listing.name, host = %listing.host_ip, port = listing.host_port, "joining room");
    Ok(RelayClient::connect(&listing.host_ip, listing.host_port, events).await)
}

/// One user's participation in one room.
pub enum Session {
    Host(HostedRoom),
    Client(RelayClient),
}

impl Session {
    /// Sends `text` as `nickname`. Blank input is ignored.
    pub fn say(&self, nickname: &str, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let line = chat_line(nickname, text);
        match self {
            Session::Host(room) => room.host().broadcast(&line),
            Session::Client(client) => client.send(&line),
        }
    }

    pub async fn leave(self) {
        match self {
            Session::Host(room) => room.close().await,
            Session::Client(client) => client.stop().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn picked_ports_stay_in_range() {
        for _ in 0..100 {
            assert!(ROOM_PORT_RANGE.contains(&pick_room_port()));
        }
    }

    #[test]
    fn chat_line_prefixes_nickname() {
        assert_eq!(chat_line("alice", "hi there"), "alice: hi there");
    }

    #[tokio::test]
    async fn wrong_password_is_rejected_before_connecting() {
        let listing = RoomListing {
            name: "lobby".into(),
            host_ip: "127.0.0.1".into(),
            host_port: 1,
            password: Some("abc".into()),
        };
        let (events, mut sink) = mpsc::unbounded_channel();

        let result = join_room(&listing, Some("nope"), events).await;

        assert!(matches!(
            result,
            Err(RelayError::PasswordRejected { room }) if room == "lobby"
        ));
        assert!(sink.recv().await.is_none(), "no connection was attempted");
    }
}
