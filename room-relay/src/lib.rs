//! Room directory and chat relay for small local chat rooms.
//!
//! A room is advertised in a directory and served by a relay that its host
//! runs. Each module owns one concern:
//!
//! - [`message`] is the wire codec: JSON lines for directory requests and
//!   plain newline-terminated text for chat.
//! - [`registry`] keeps the directory's in-memory room map.
//! - [`directory`] serves that map over one-shot TCP connections and offers
//!   the client helpers rooms use to register, unregister and list.
//! - [`relay`] holds the room host, which rebroadcasts every line to all
//!   peers and its own sink, and the client that joins it.
//! - [`session`] ties hosting and joining to the directory.
//! - [`cli`] parses the binary's subcommands.
//! - [`error`] defines the error taxonomy shared by all of the above.
//!
//! There are no retries, heartbeats or persistence. A host that dies without
//! unregistering stays listed until its name is reused.

pub mod cli;
pub mod directory;
pub mod error;
pub mod message;
pub mod registry;
pub mod relay;
pub mod session;

pub use error::{RelayError, Result};
