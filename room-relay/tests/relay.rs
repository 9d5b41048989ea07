use std::time::Duration;

use anyhow::{Context, Result, bail};
use room_relay::relay::{
    ClientState, HostState, PEER_QUEUE_DEPTH, RelayClient, RelayEvent, RelayHost,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc::{self, UnboundedReceiver},
    time::{Instant, sleep, timeout},
};

const WAIT: Duration = Duration::from_secs(2);

async fn start_host() -> Result<(RelayHost, UnboundedReceiver<RelayEvent>)> {
    let (events, mut inbox) = mpsc::unbounded_channel();
    let host = RelayHost::start("127.0.0.1", 0, events).await;
    match timeout(WAIT, inbox.recv()).await? {
        Some(RelayEvent::Listening { .. }) => Ok((host, inbox)),
        other => bail!("expected host to start listening, got {other:?}"),
    }
}

async fn join(host: &RelayHost) -> Result<(RelayClient, UnboundedReceiver<RelayEvent>)> {
    let addr = host.local_addr().context("host has no address")?;
    let (events, mut inbox) = mpsc::unbounded_channel();
    let client = RelayClient::connect("127.0.0.1", addr.port(), events).await;
    match timeout(WAIT, inbox.recv()).await? {
        Some(RelayEvent::Connected { addr: connected }) => {
            assert_eq!(client.peer_addr(), Some(connected));
            assert_eq!(connected.port(), addr.port());
            Ok((client, inbox))
        }
        other => bail!("expected client to connect, got {other:?}"),
    }
}

async fn wait_for_peers(host: &RelayHost, expected: usize) -> Result<()> {
    let deadline = Instant::now() + WAIT;
    while host.peer_count() != expected {
        if Instant::now() > deadline {
            bail!(
                "host has {} peers, expected {expected}",
                host.peer_count()
            );
        }
        sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

async fn next_event(inbox: &mut UnboundedReceiver<RelayEvent>) -> Result<RelayEvent> {
    timeout(WAIT, inbox.recv())
        .await
        .context("timed out waiting for relay event")?
        .context("event sink closed")
}

async fn next_message(inbox: &mut UnboundedReceiver<RelayEvent>) -> Result<String> {
    match next_event(inbox).await? {
        RelayEvent::Message(line) => Ok(line),
        other => bail!("expected a chat line, got {other:?}"),
    }
}

async fn assert_quiet(inbox: &mut UnboundedReceiver<RelayEvent>) {
    // A closed sink is as quiet as an idle one.
    let extra = timeout(Duration::from_millis(150), inbox.recv()).await;
    assert!(
        matches!(extra, Err(_) | Ok(None)),
        "unexpected extra event: {extra:?}"
    );
}

#[tokio::test]
async fn peer_line_reaches_every_peer_and_host_once() -> Result<()> {
    let (host, mut host_inbox) = start_host().await?;
    let (alice, mut alice_inbox) = join(&host).await?;
    let (bob, mut bob_inbox) = join(&host).await?;
    let (carol, mut carol_inbox) = join(&host).await?;
    wait_for_peers(&host, 3).await?;

    alice.send("alice: hi all");

    assert_eq!(next_message(&mut bob_inbox).await?, "alice: hi all");
    assert_eq!(next_message(&mut carol_inbox).await?, "alice: hi all");
    assert_eq!(next_message(&mut alice_inbox).await?, "alice: hi all");
    assert_eq!(next_message(&mut host_inbox).await?, "alice: hi all");
    assert_quiet(&mut host_inbox).await;

    alice.stop().await;
    bob.stop().await;
    carol.stop().await;
    host.stop().await;
    Ok(())
}

#[tokio::test]
async fn host_lines_reach_peers_and_its_own_sink() -> Result<()> {
    let (host, mut host_inbox) = start_host().await?;
    let (client, mut client_inbox) = join(&host).await?;
    wait_for_peers(&host, 1).await?;

    host.broadcast("host: welcome");

    assert_eq!(next_message(&mut client_inbox).await?, "host: welcome");
    assert_eq!(next_message(&mut host_inbox).await?, "host: welcome");
    assert_quiet(&mut host_inbox).await;

    client.stop().await;
    host.stop().await;
    Ok(())
}

#[tokio::test]
async fn departed_peer_does_not_block_the_rest() -> Result<()> {
    let (host, mut host_inbox) = start_host().await?;
    let (alice, mut alice_inbox) = join(&host).await?;
    let (bob, _bob_inbox) = join(&host).await?;
    let (carol, mut carol_inbox) = join(&host).await?;
    wait_for_peers(&host, 3).await?;

    bob.stop().await;
    wait_for_peers(&host, 2).await?;

    host.broadcast("still here");

    assert_eq!(next_message(&mut alice_inbox).await?, "still here");
    assert_eq!(next_message(&mut carol_inbox).await?, "still here");
    assert_eq!(next_message(&mut host_inbox).await?, "still here");

    alice.stop().await;
    carol.stop().await;
    host.stop().await;
    Ok(())
}

#[tokio::test]
async fn abruptly_closed_socket_is_dropped_from_the_room() -> Result<()> {
    let (host, _host_inbox) = start_host().await?;
    let (alice, mut alice_inbox) = join(&host).await?;
    let addr = host.local_addr().context("host address")?;
    let raw = TcpStream::connect(addr).await?;
    wait_for_peers(&host, 2).await?;

    drop(raw);
    wait_for_peers(&host, 1).await?;

    host.broadcast("after the drop");
    assert_eq!(next_message(&mut alice_inbox).await?, "after the drop");

    alice.stop().await;
    host.stop().await;
    Ok(())
}

#[tokio::test]
async fn send_after_host_stops_is_silent_and_client_disconnects() -> Result<()> {
    let (host, _host_inbox) = start_host().await?;
    let (client, mut client_inbox) = join(&host).await?;
    wait_for_peers(&host, 1).await?;

    host.stop().await;

    assert_eq!(next_event(&mut client_inbox).await?, RelayEvent::Disconnected);
    timeout(WAIT, client.wait_disconnected()).await?;
    assert_eq!(client.state(), ClientState::Disconnected);

    // Nothing to reconnect to and no retry: the line is simply dropped.
    client.send("anyone there?");
    client.send("hello?");
    assert_quiet(&mut client_inbox).await;

    client.stop().await;
    Ok(())
}

#[tokio::test]
async fn stop_closes_peers_and_reports_stopped() -> Result<()> {
    let (host, _host_inbox) = start_host().await?;
    let (client, mut client_inbox) = join(&host).await?;
    wait_for_peers(&host, 1).await?;
    timeout(WAIT, host.wait_for_state(HostState::Running)).await?;

    let addr = host.local_addr().context("host address")?;
    host.stop().await;

    assert_eq!(next_event(&mut client_inbox).await?, RelayEvent::Disconnected);
    assert_eq!(client.state(), ClientState::Disconnected);
    assert!(
        TcpStream::connect(addr).await.is_err(),
        "listener should be closed after stop"
    );

    client.stop().await;
    Ok(())
}

#[tokio::test]
async fn lines_are_reframed_regardless_of_chunking() -> Result<()> {
    let (host, mut host_inbox) = start_host().await?;
    let (listener, mut listener_inbox) = join(&host).await?;
    let addr = host.local_addr().context("host address")?;
    let mut raw = TcpStream::connect(addr).await?;
    wait_for_peers(&host, 2).await?;

    raw.write_all(b"dana: par").await?;
    raw.flush().await?;
    sleep(Duration::from_millis(50)).await;
    raw.write_all(b"tial\ndana: one\ndana: two\n").await?;

    for expected in ["dana: partial", "dana: one", "dana: two"] {
        assert_eq!(next_message(&mut listener_inbox).await?, expected);
        assert_eq!(next_message(&mut host_inbox).await?, expected);
    }

    drop(raw);
    listener.stop().await;
    host.stop().await;
    Ok(())
}

#[tokio::test]
async fn client_stop_reports_disconnect_once() -> Result<()> {
    let (host, _host_inbox) = start_host().await?;
    let (client, mut client_inbox) = join(&host).await?;

    client.stop().await;

    assert_eq!(next_event(&mut client_inbox).await?, RelayEvent::Disconnected);
    assert!(client_inbox.recv().await.is_none());

    host.stop().await;
    Ok(())
}

#[tokio::test]
async fn peer_that_never_reads_is_dropped_and_room_keeps_working() -> Result<()> {
    let (host, host_inbox) = start_host().await?;
    // The host's own copies are not under test here.
    drop(host_inbox);
    let addr = host.local_addr().context("host address")?;
    let mut silent = TcpStream::connect(addr).await?;
    wait_for_peers(&host, 1).await?;

    // Feed the room in bursts smaller than one peer queue so only a peer whose
    // socket has stopped draining can fall behind.
    let line = "x".repeat(1024);
    let deadline = Instant::now() + Duration::from_secs(10);
    while host.peer_count() > 0 {
        if Instant::now() > deadline {
            bail!("silent peer was never dropped");
        }
        for _ in 0..PEER_QUEUE_DEPTH / 2 {
            host.broadcast(&line);
        }
        sleep(Duration::from_millis(1)).await;
    }

    // The silent peer's connection is closed once it catches up.
    let mut drained = Vec::new();
    let _ = timeout(Duration::from_secs(5), silent.read_to_end(&mut drained))
        .await
        .context("silent peer was never hung up on")?;

    let (client, mut client_inbox) = join(&host).await?;
    wait_for_peers(&host, 1).await?;
    host.broadcast("still serving");
    assert_eq!(next_message(&mut client_inbox).await?, "still serving");

    client.stop().await;
    host.stop().await;
    Ok(())
}
