//! テスト用のローカルwebsocketサーバー

use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_tungstenite::{
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    WebSocketStream,
};

pub(crate) type ServerSocket = WebSocketStream<TcpStream>;

pub(crate) struct TestServer {
    pub url: String,
    accepts: Arc<AtomicUsize>,
}

impl TestServer {
    /// 受け付けた接続数
    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }
}

/// 接続ごとに`handler(接続番号, socket)`を実行するサーバーを起動します。接続番号は0から
pub(crate) async fn spawn_server<F, Fut>(handler: F) -> TestServer
where
    F: Fn(usize, ServerSocket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("ポートを確保できませんでした");
    let url = format!("ws://{}", listener.local_addr().expect("アドレスを取得できませんでした"));
    let accepts = Arc::new(AtomicUsize::new(0));

    let counter = accepts.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let index = counter.fetch_add(1, Ordering::SeqCst);
            let Ok(socket) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            tokio::spawn(handler(index, socket));
        }
    });

    TestServer { url, accepts }
}

pub(crate) fn hello() -> Value {
    json!({ "op": 10, "d": { "heartbeat_interval": 45000, "_trace": ["test-gw"] } })
}

pub(crate) async fn send_json(socket: &mut ServerSocket, value: Value) {
    let _ = socket.send(Message::Text(value.to_string())).await;
}

pub(crate) async fn send_close(socket: &mut ServerSocket, code: u16) {
    let frame = CloseFrame { code: CloseCode::from(code), reason: "".into() };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

/// 接続が終わるまで読み捨てます。
pub(crate) async fn drain(mut socket: ServerSocket) {
    while let Some(Ok(_)) = socket.next().await {}
}

/// 受信したJSONを`tx`に流します。
pub(crate) async fn forward_json(mut socket: ServerSocket, tx: mpsc::UnboundedSender<Value>) {
    while let Some(Ok(message)) = socket.next().await {
        if let Message::Text(text) = message {
            if let Ok(value) = serde_json::from_str(&text) {
                let _ = tx.send(value);
            }
        }
    }
}
