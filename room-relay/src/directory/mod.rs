//! Room directory: the registry service and the helpers rooms use to reach it.

mod client;
mod service;

pub use client::{DIRECTORY_TIMEOUT, DirectoryClient, RoomListing};
pub use service::{DirectoryService, EmbeddedDirectory, REQUEST_TIMEOUT, apply_request};

/// Well-known address the directory listens on unless told otherwise.
pub const DEFAULT_DIRECTORY_ADDR: &str = "127.0.0.1:5000";
