//! Shared harness: boots a real server on an ephemeral port with a temp data
//! dir, plus REST and WebSocket helpers used across the integration tests.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub base_url: String,
    pub addr: SocketAddr,
}

/// Start the server on a random port and return its address.
pub async fn start_test_server() -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = gather_server::db::init_db(&data_dir).expect("Failed to init DB");
    let session_secret =
        gather_server::auth::jwt::load_or_generate_session_secret(&data_dir)
            .expect("Failed to generate session secret");

    let state = gather_server::state::AppState::new(db, session_secret);
    let app = gather_server::routes::build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    TestServer {
        base_url: format!("http://{}", addr),
        addr,
    }
}

/// A logged-in REST identity.
pub struct Session {
    pub user_id: String,
    pub token: String,
    pub client: reqwest::Client,
    base_url: String,
}

impl Session {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(self.url(path))
            .header("Authorization", format!("Bearer {}", self.token))
    }

    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.url(path))
            .header("Authorization", format!("Bearer {}", self.token))
    }
}

/// Establish a session for a handle (auto-provisions the user).
pub async fn login(server: &TestServer, handle: &str) -> Session {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/auth/login", server.base_url))
        .json(&serde_json::json!({ "handle": handle }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "Login failed for {}", handle);
    let body: serde_json::Value = resp.json().await.unwrap();

    Session {
        user_id: body["user_id"].as_str().unwrap().to_string(),
        token: body["token"].as_str().unwrap().to_string(),
        client,
        base_url: server.base_url.clone(),
    }
}

/// Open a WebSocket carrying the session cookie, exactly as a browser would.
pub async fn connect_ws(server: &TestServer, token: &str) -> WsStream {
    let mut request = format!("ws://{}/ws", server.addr)
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        "Cookie",
        format!("gather_session={}", token).parse().unwrap(),
    );
    let (ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("Failed to connect to WebSocket");
    ws
}

/// Next JSON text frame within the timeout, skipping control frames.
/// None on timeout or connection end.
pub async fn next_json(ws: &mut WsStream, ms: u64) -> Option<serde_json::Value> {
    let deadline = tokio::time::timeout(Duration::from_millis(ms), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some(serde_json::from_str(&text).expect("frame is not JSON"))
                }
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Ok(_)) => continue,
                Some(Err(_)) => return None,
            }
        }
    });
    deadline.await.ok().flatten()
}

/// Drain frames until one of the given `type` arrives. Panics on timeout.
pub async fn expect_frame(ws: &mut WsStream, frame_type: &str) -> serde_json::Value {
    for _ in 0..20 {
        if let Some(frame) = next_json(ws, 2_000).await {
            if frame["type"] == frame_type {
                return frame;
            }
            continue;
        }
        break;
    }
    panic!("never received a {} frame", frame_type);
}

/// Create a conversation between the caller and the listed handles.
pub async fn create_conversation(session: &Session, member_handles: &[&str]) -> String {
    let resp = session
        .post("/api/conversations")
        .json(&serde_json::json!({ "member_handles": member_handles }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    body["id"].as_str().unwrap().to_string()
}

/// Send a message over REST; returns the created message.
pub async fn send_message(
    session: &Session,
    conversation_id: &str,
    body: &str,
) -> serde_json::Value {
    let resp = session
        .post(&format!("/api/conversations/{}/messages", conversation_id))
        .json(&serde_json::json!({ "body": body }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}
