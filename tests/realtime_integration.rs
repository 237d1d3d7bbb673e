//! Purpose: End-to-end tests for the realtime channel.
//! Exports: None (integration test module).
//! Role: Validate session presence counts and mutation fan-out over
//! WebSocket against the spawned server binary.
//! Invariants: Events are awaited with bounded timeouts; absence is asserted
//! with a short grace window.
//! Invariants: Server processes are cleaned up on drop.

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::io::Read;
use std::net::{SocketAddr, TcpListener};
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

static SERVER_LOCK: Mutex<()> = Mutex::new(());

struct TestServer {
    child: Child,
    ws_url: String,
    _server_guard: MutexGuard<'static, ()>,
}

impl TestServer {
    fn start(data_dir: &std::path::Path) -> TestResult<Self> {
        let guard = SERVER_LOCK
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let mut last_err: Option<Box<dyn std::error::Error>> = None;
        for _attempt in 0..3 {
            let port = pick_port()?;
            let bind = format!("127.0.0.1:{port}");

            let mut child = Command::new(env!("CARGO_BIN_EXE_snipstore"))
                .arg("--dir")
                .arg(data_dir)
                .arg("serve")
                .arg("--bind")
                .arg(&bind)
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .spawn()?;

            match wait_for_server(&mut child, bind.parse()?) {
                Ok(()) => {
                    return Ok(Self {
                        child,
                        ws_url: format!("ws://{bind}/realtime"),
                        _server_guard: guard,
                    });
                }
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    last_err = Some(err);
                    sleep(Duration::from_millis(30));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| "server failed to start".into()))
    }

    async fn connect(&self) -> TestResult<WsClient> {
        let (socket, _response) = connect_async(self.ws_url.as_str()).await?;
        Ok(socket)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn pick_port() -> TestResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

fn wait_for_server(child: &mut Child, addr: SocketAddr) -> TestResult<()> {
    let url = format!("http://{addr}/healthz");
    let start = Instant::now();
    loop {
        if let Ok(resp) = ureq::get(&url).call() {
            if resp.status() == 200 {
                return Ok(());
            }
        }
        if let Some(status) = child.try_wait()? {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            let detail = stderr.trim();
            return Err(format!(
                "server exited before ready (status: {status}, stderr: {})",
                if detail.is_empty() { "<empty>" } else { detail }
            )
            .into());
        }
        if start.elapsed() > Duration::from_secs(8) {
            return Err("server did not start in time".into());
        }
        sleep(Duration::from_millis(20));
    }
}

async fn next_event(socket: &mut WsClient) -> TestResult<Value> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .map_err(|_| "timed out waiting for event")?
            .ok_or("socket closed")??;
        match frame {
            Message::Text(text) => return Ok(serde_json::from_str(&text)?),
            // Control frames are transparent to event consumers.
            _ => continue,
        }
    }
}

async fn expect_user_count(socket: &mut WsClient, expected: u64) -> TestResult<()> {
    let event = next_event(socket).await?;
    if event["event"] != "user-count" || event["data"] != json!(expected) {
        return Err(format!("expected user-count {expected}, got {event}").into());
    }
    Ok(())
}

async fn expect_silence(socket: &mut WsClient) -> TestResult<()> {
    match tokio::time::timeout(Duration::from_millis(300), socket.next()).await {
        Err(_elapsed) => Ok(()),
        Ok(Some(Ok(Message::Text(text)))) => Err(format!("unexpected event: {text}").into()),
        Ok(_) => Ok(()),
    }
}

fn record(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "language": "go",
        "code": "for {}",
        "description": "",
        "tags": [],
        "createdAt": "2026-01-01T00:00:00Z",
        "updatedAt": "2026-01-01T00:00:00Z",
    })
}

#[tokio::test]
async fn user_count_tracks_connects_and_disconnects() -> TestResult<()> {
    let temp_dir = tempfile::tempdir()?;
    let server = TestServer::start(temp_dir.path())?;

    let mut first = server.connect().await?;
    expect_user_count(&mut first, 1).await?;

    let mut second = server.connect().await?;
    expect_user_count(&mut second, 2).await?;
    expect_user_count(&mut first, 2).await?;

    second.close(None).await?;
    expect_user_count(&mut first, 1).await?;
    Ok(())
}

#[tokio::test]
async fn mutation_events_reach_every_other_session_once() -> TestResult<()> {
    let temp_dir = tempfile::tempdir()?;
    let server = TestServer::start(temp_dir.path())?;

    let mut origin = server.connect().await?;
    expect_user_count(&mut origin, 1).await?;
    let mut observer = server.connect().await?;
    expect_user_count(&mut observer, 2).await?;
    expect_user_count(&mut origin, 2).await?;

    let id = "a1b2c3d4e5f60718293a4b5c";
    let create = json!({ "event": "create-snippet", "data": record(id, "loop") });
    origin.send(Message::Text(create.to_string())).await?;

    let event = next_event(&mut observer).await?;
    assert_eq!(event["event"], "snippet-created");
    assert_eq!(event["data"]["id"], id);
    assert_eq!(event["data"]["name"], "loop");

    let delete = json!({ "event": "delete-snippet", "data": id });
    origin.send(Message::Text(delete.to_string())).await?;

    let event = next_event(&mut observer).await?;
    assert_eq!(event["event"], "snippet-deleted");
    assert_eq!(event["data"], json!(id));

    // Exactly once for the observer, never for the origin.
    expect_silence(&mut observer).await?;
    expect_silence(&mut origin).await?;
    Ok(())
}

#[tokio::test]
async fn malformed_events_are_dropped_without_closing_the_session() -> TestResult<()> {
    let temp_dir = tempfile::tempdir()?;
    let server = TestServer::start(temp_dir.path())?;

    let mut origin = server.connect().await?;
    expect_user_count(&mut origin, 1).await?;
    let mut observer = server.connect().await?;
    expect_user_count(&mut observer, 2).await?;
    expect_user_count(&mut origin, 2).await?;

    origin.send(Message::Text("not json".to_string())).await?;
    origin
        .send(Message::Text(r#"{"event": "unknown-event", "data": 1}"#.to_string()))
        .await?;

    let id = "ffeeddccbbaa99887766554433";
    let delete = json!({ "event": "delete-snippet", "data": id });
    origin.send(Message::Text(delete.to_string())).await?;

    let event = next_event(&mut observer).await?;
    assert_eq!(event["event"], "snippet-deleted");
    assert_eq!(event["data"], json!(id));
    Ok(())
}

#[tokio::test]
async fn update_events_carry_the_full_record() -> TestResult<()> {
    let temp_dir = tempfile::tempdir()?;
    let server = TestServer::start(temp_dir.path())?;

    let mut origin = server.connect().await?;
    expect_user_count(&mut origin, 1).await?;
    let mut observer = server.connect().await?;
    expect_user_count(&mut observer, 2).await?;
    expect_user_count(&mut origin, 2).await?;

    let id = "00112233445566778899aabb";
    let mut updated = record(id, "loop");
    updated["description"] = json!("simple loop");
    let event = json!({ "event": "update-snippet", "data": updated });
    origin.send(Message::Text(event.to_string())).await?;

    let event = next_event(&mut observer).await?;
    assert_eq!(event["event"], "snippet-updated");
    assert_eq!(event["data"]["description"], "simple loop");
    Ok(())
}
