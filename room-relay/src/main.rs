use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    select,
    sync::mpsc,
};
use tracing::{info, warn};

use room_relay::{
    cli::{Cli, Command, DirectoryArgs, DirectoryTarget, HostArgs, JoinArgs, ListArgs},
    directory::{DirectoryClient, DirectoryService, EmbeddedDirectory},
    relay::RelayEvent,
    session::{HostedRoom, RoomConfig, Session, join_room},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Directory(args) => run_directory(args).await?,
        Command::List(args) => list_rooms(args).await?,
        Command::Host(args) => host_room(args).await?,
        Command::Join(args) => join(args).await?,
    }

    Ok(())
}

async fn run_directory(args: DirectoryArgs) -> Result<()> {
    let service = DirectoryService::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind directory on {}", args.listen))?;
    let addr = service.local_addr()?;
    info!("directory listening on {}", addr);
    if let Err(err) = service.run_until_ctrl_c().await {
        warn!("directory exited with error: {err:?}");
        return Err(err.into());
    }
    Ok(())
}

fn directory_client(target: &DirectoryTarget) -> DirectoryClient {
    DirectoryClient::new(target.directory).with_timeout(Duration::from_secs(target.timeout_secs))
}

/// Offers to serve the directory from this process, like every chat process does.
async fn embedded_directory(
    target: &DirectoryTarget,
    disabled: bool,
) -> Option<EmbeddedDirectory> {
    if disabled {
        return None;
    }
    EmbeddedDirectory::try_start(target.directory).await
}

async fn stop_embedded(directory: Option<EmbeddedDirectory>) {
    if let Some(directory) = directory {
        directory.stop().await;
    }
}

async fn list_rooms(args: ListArgs) -> Result<()> {
    let directory = directory_client(&args.target);
    let rooms = match directory.list_rooms().await {
        Ok(rooms) => rooms,
        Err(err) => {
            write_stderr(&format!("!!! room listing failed: {err}")).await?;
            Vec::new()
        }
    };

    if rooms.is_empty() {
        return write_stdout("*** no rooms advertised").await.map_err(Into::into);
    }
    for room in rooms {
        write_stdout(&room.to_string()).await?;
    }
    Ok(())
}

async fn host_room(args: HostArgs) -> Result<()> {
    let directory = directory_client(&args.target);
    let config = RoomConfig {
        name: args.room,
        password: args.password,
        advertise_ip: args.advertise.unwrap_or_else(|| args.bind.clone()),
        bind_ip: args.bind,
        port: args.port,
    };

    let embedded = embedded_directory(&args.target, args.no_directory).await;
    let (events, inbox) = mpsc::unbounded_channel();
    let room = HostedRoom::create(directory, config, events).await;
    let result = chat(Session::Host(room), &args.nickname, inbox).await;
    stop_embedded(embedded).await;
    result
}

async fn join(args: JoinArgs) -> Result<()> {
    let embedded = embedded_directory(&args.target, args.no_directory).await;
    let result = join_listed_room(&args).await;
    stop_embedded(embedded).await;
    result
}

async fn join_listed_room(args: &JoinArgs) -> Result<()> {
    let directory = directory_client(&args.target);
    let listing = directory
        .find_room(&args.room)
        .await
        .context("failed to list rooms")?
        .with_context(|| {
            format!(
                "room '{}' is not advertised by {}",
                args.room,
                directory.addr()
            )
        })?;

    let (events, inbox) = mpsc::unbounded_channel();
    let client = join_room(&listing, args.password.as_deref(), events).await?;
    chat(Session::Client(client), &args.nickname, inbox).await
}

async fn chat(
    session: Session,
    nickname: &str,
    mut inbox: mpsc::UnboundedReceiver<RelayEvent>,
) -> Result<()> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut failed = false;

    loop {
        select! {
            event = inbox.recv() => {
                let Some(event) = event else { break };
                write_stdout(&event.to_string()).await?;
                match event {
                    RelayEvent::Failed { .. } => {
                        failed = true;
                        break;
                    }
                    RelayEvent::Disconnected => break,
                    _ => {}
                }
            }
            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                let text = line.trim_end();
                if text.eq_ignore_ascii_case("/quit") {
                    write_stdout("*** leaving room").await?;
                    break;
                }
                session.say(nickname, text);
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    session.leave().await;
    if failed {
        anyhow::bail!("room session could not start");
    }
    Ok(())
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
