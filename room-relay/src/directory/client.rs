use std::{fmt, net::SocketAddr, time::Duration};

use tokio::{io::BufReader, net::TcpStream, time::timeout};
use tracing::{debug, warn};

use crate::{
    error::{RelayError, Result},
    message::{
        DirectoryRequest, DirectoryResponse, MAX_RESPONSE_BYTES, RoomEntry, read_json, write_json,
    },
};

/// Upper bound for one directory round trip, connect included.
pub const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(2);

/// A room as advertised by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomListing {
    pub name: String,
    pub host_ip: String,
    pub host_port: u16,
    pub password: Option<String>,
}

impl RoomListing {
    pub fn requires_password(&self) -> bool {
        self.password.as_deref().is_some_and(|password| !password.is_empty())
    }

    /// Checks a join attempt against the room's shared password.
    pub fn admits(&self, attempt: Option<&str>) -> bool {
        if !self.requires_password() {
            return true;
        }
        attempt == self.password.as_deref()
    }
}

impl From<(String, RoomEntry)> for RoomListing {
    fn from((name, entry): (String, RoomEntry)) -> Self {
        Self {
            name,
            host_ip: entry.host_ip,
            host_port: entry.host_port,
            password: entry.password,
        }
    }
}

impl fmt::Display for RoomListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}:{}", self.name, self.host_ip, self.host_port)?;
        if self.requires_password() {
            write!(f, " (password)")?;
        }
        Ok(())
    }
}

/// Talks to a [`DirectoryService`](super::DirectoryService).
///
/// Every call opens its own short-lived connection and gives up after the
/// configured timeout. Nothing is retried.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    addr: SocketAddr,
    timeout: Duration,
}

impl DirectoryClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timeout: DIRECTORY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Advertises a room. Failures are logged and otherwise ignored: the room
    /// keeps working locally even when it cannot be listed.
    pub async fn register_room(
        &self,
        name: &str,
        host_ip: &str,
        host_port: u16,
        password: Option<&str>,
    ) {
        let request = DirectoryRequest::Register {
            room_name: name.to_string(),
            host_ip: host_ip.to_string(),
            host_port,
            password: password.map(str::to_string),
        };
        match self.exchange(&request).await {
            Ok(_) => debug!(room = name, directory = %self.addr, "room registered"),
            Err(err) => warn!(room = name, error = %err, "failed to register room"),
        }
    }

    /// Withdraws a room. Failures are logged and otherwise ignored.
    pub async fn unregister_room(&self, name: &str) {
        let request = DirectoryRequest::Unregister {
            room_name: name.to_string(),
        };
        match self.exchange(&request).await {
            Ok(_) => debug!(room = name, directory = %self.addr, "room unregistered"),
            Err(err) => warn!(room = name, error = %err, "failed to unregister room"),
        }
    }

    /// Fetches every advertised room, sorted by name.
    ///
    /// Callers that only want a best-effort list can fall back with
    /// `unwrap_or_default()` after reporting the error.
    pub async fn list_rooms(&self) -> Result<Vec<RoomListing>> {
        match self.exchange(&DirectoryRequest::List).await? {
            DirectoryResponse::Rooms { rooms } => {
                Ok(rooms.into_iter().map(RoomListing::from).collect())
            }
            DirectoryResponse::Status { .. } => Err(RelayError::malformed(
                "directory answered a list request without rooms",
            )),
        }
    }

    pub async fn find_room(&self, name: &str) -> Result<Option<RoomListing>> {
        let rooms = self.list_rooms().await?;
        Ok(rooms.into_iter().find(|room| room.name == name))
    }

    async fn exchange(&self, request: &DirectoryRequest) -> Result<DirectoryResponse> {
        match timeout(self.timeout, self.round_trip(request)).await {
            Ok(result) => result,
            Err(_) => Err(self.unavailable(format!("no answer within {:?}", self.timeout))),
        }
    }

    async fn round_trip(&self, request: &DirectoryRequest) -> Result<DirectoryResponse> {
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(|err| self.unavailable(err))?;
        let (reader, mut writer) = stream.into_split();

        write_json(&mut writer, request)
            .await
            .map_err(|err| self.transport_error(err))?;

        let mut reader = BufReader::new(reader);
        read_json(&mut reader, MAX_RESPONSE_BYTES)
            .await
            .map_err(|err| self.transport_error(err))?
            .ok_or_else(|| self.unavailable("connection closed without a response"))
    }

    fn transport_error(&self, err: RelayError) -> RelayError {
        match err {
            RelayError::Io(err) => self.unavailable(err),
            other => other,
        }
    }

    fn unavailable(&self, reason: impl ToString) -> RelayError {
        RelayError::DirectoryUnavailable {
            addr: self.addr,
            reason: reason.to_string(),
        }
    }
}
