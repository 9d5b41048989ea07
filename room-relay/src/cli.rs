use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

use crate::directory::DEFAULT_DIRECTORY_ADDR;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the room directory, tracking advertised rooms in memory.
    Directory(DirectoryArgs),
    /// Print the rooms the directory currently advertises.
    List(ListArgs),
    /// Create a room, advertise it and chat from stdin.
    Host(HostArgs),
    /// Join an advertised room and chat from stdin.
    Join(JoinArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DirectoryArgs {
    /// Socket address the directory should bind to. Use 0 for an ephemeral port.
    #[arg(long, default_value = DEFAULT_DIRECTORY_ADDR)]
    pub listen: SocketAddr,
}

#[derive(Args, Debug, Clone)]
pub struct DirectoryTarget {
    /// Address of the room directory.
    #[arg(long, default_value = DEFAULT_DIRECTORY_ADDR)]
    pub directory: SocketAddr,

    /// Seconds to wait for the directory before giving up.
    #[arg(long, default_value_t = 2)]
    pub timeout_secs: u64,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    #[command(flatten)]
    pub target: DirectoryTarget,
}

#[derive(Args, Debug, Clone)]
pub struct HostArgs {
    /// Name the room is advertised under.
    #[arg(long)]
    pub room: String,

    /// Shared password joiners must supply.
    #[arg(long)]
    pub password: Option<String>,

    /// Port for the room's relay. Picked from 6000-7000 when omitted.
    #[arg(long)]
    pub port: Option<u16>,

    /// Interface the relay listens on.
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: String,

    /// Address advertised to joiners. Defaults to the bind address.
    #[arg(long)]
    pub advertise: Option<String>,

    /// Name shown in front of your messages.
    #[arg(long)]
    pub nickname: String,

    #[command(flatten)]
    pub target: DirectoryTarget,

    /// Never serve the directory from this process.
    #[arg(long)]
    pub no_directory: bool,
}

#[derive(Args, Debug, Clone)]
pub struct JoinArgs {
    /// Room to join, as listed by the directory.
    #[arg(long)]
    pub room: String,

    /// Password for protected rooms.
    #[arg(long)]
    pub password: Option<String>,

    /// Name shown in front of your messages.
    #[arg(long)]
    pub nickname: String,

    #[command(flatten)]
    pub target: DirectoryTarget,

    /// Never serve the directory from this process.
    #[arg(long)]
    pub no_directory: bool,
}
