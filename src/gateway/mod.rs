//! Discordのwebsocketゲートウェイに接続し、受信データを解析するシャード単位のハンドラ
//!
//! ```no_run
//! # async fn run() -> Result<(), shardbot::gateway::GatewayError> {
//! use shardbot::gateway::{open_gateway, payload::IdentifyOptions};
//!
//! let gateway = open_gateway("token", "wss://gateway.discord.gg", 0, 1, IdentifyOptions::default()).await?;
//! loop {
//!     let event = gateway.next_event().await?;
//!     println!("{}", event.name());
//! }
//! # }
//! ```

pub mod payload;
pub mod state;
pub mod zlib;

#[cfg(test)]
pub(crate) mod test_server;

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use futures::{stream::SplitStream, FutureExt, SinkExt, StreamExt};
use rand::Rng;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch, Mutex, Notify},
};
use tokio_tungstenite::{
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message as WsMessage,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::gateway::{
    payload::{GatewayFrame, GatewayOp, IdentifyOptions, Presence, GATEWAY_VERSION},
    state::{GatewayState, HeartbeatStats},
    zlib::ZlibStream,
};

type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// 認証失敗を表すclose code
const CLOSE_AUTHENTICATION_FAILED: u16 = 4004;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("ゲートウェイに接続されていません(NotConnected)")]
    NotConnected,
    #[error("closeで接続が閉じられました(Closed)")]
    Closed,
    #[error("トークンが拒否されました(AuthenticationFailed)")]
    AuthenticationFailed,
    #[error("websocketエラー: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("JSONエラー: {0}")]
    Json(#[from] serde_json::Error),
    #[error("zlib展開エラー: {0}")]
    Decompress(#[from] flate2::DecompressError),
    #[error("UTF-8ではないペイロード: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// websocketから受け取ったデータ
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayData {
    Text(String),
    Binary(Vec<u8>),
}

/// 書き込みタスクに渡すフレーム
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// ゲートウェイが生成するイベント
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Hello { trace: Vec<String> },
    HeartbeatReceived,
    HeartbeatAck,
    InvalidateSession { resumable: bool },
    Dispatch { name: String, data: Value },
}

impl GatewayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            GatewayEvent::Hello { .. } => "gateway_hello",
            GatewayEvent::HeartbeatReceived => "gateway_heartbeat_received",
            GatewayEvent::HeartbeatAck => "gateway_heartbeat_ack",
            GatewayEvent::InvalidateSession { .. } => "gateway_invalidate_session",
            GatewayEvent::Dispatch { .. } => "gateway_dispatch_received",
        }
    }

    /// イベントマネージャーに渡すペイロード
    pub fn payload(&self) -> Value {
        match self {
            GatewayEvent::Hello { trace } => json!(trace),
            GatewayEvent::HeartbeatReceived | GatewayEvent::HeartbeatAck => Value::Null,
            GatewayEvent::InvalidateSession { resumable } => json!(resumable),
            GatewayEvent::Dispatch { name, data } => json!([name, data]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CloseOptions {
    pub code: u16,
    pub reason: String,
    pub reconnect: bool,
    pub clear_session_id: bool,
}

impl Default for CloseOptions {
    fn default() -> Self {
        Self {
            code: 1000,
            reason: "Client closed connection".into(),
            reconnect: false,
            clear_session_id: true,
        }
    }
}

pub struct GatewayHandler {
    shard_id: u32,
    identify: IdentifyOptions,
    state: Mutex<GatewayState>,
    heartbeat_stats: Mutex<HeartbeatStats>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    reader: Mutex<Option<WsReader>>,
    decoder: Mutex<ZlibStream>,
    pending: Mutex<VecDeque<GatewayEvent>>,
    dispatches_handled: Mutex<HashMap<String, u64>>,
    open_lock: Mutex<()>,
    reconnect_requested: AtomicBool,
    // 再接続なしのcloseが呼ばれた。次のopenまで再接続しない
    user_closed: AtomicBool,
    // 読み込み中のnext_eventを起こす
    close_signal: Notify,
    // 世代が変わったハートビートタスクは終了する
    heartbeat_generation: watch::Sender<u64>,
}

impl std::fmt::Debug for GatewayHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayHandler").field("shard_id", &self.shard_id).finish_non_exhaustive()
    }
}

impl GatewayHandler {
    pub fn new(state: GatewayState, identify: IdentifyOptions) -> Arc<Self> {
        let (heartbeat_generation, _) = watch::channel(0);
        Arc::new(Self {
            shard_id: state.shard_id,
            identify,
            state: Mutex::new(state),
            heartbeat_stats: Mutex::new(HeartbeatStats::default()),
            outbound: Mutex::new(None),
            reader: Mutex::new(None),
            decoder: Mutex::new(ZlibStream::new()),
            pending: Mutex::new(VecDeque::new()),
            dispatches_handled: Mutex::new(HashMap::new()),
            open_lock: Mutex::new(()),
            reconnect_requested: AtomicBool::new(false),
            user_closed: AtomicBool::new(false),
            close_signal: Notify::new(),
            heartbeat_generation,
        })
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    pub async fn state(&self) -> GatewayState {
        self.state.lock().await.clone()
    }

    pub async fn heartbeat_stats(&self) -> HeartbeatStats {
        *self.heartbeat_stats.lock().await
    }

    /// DISPATCHのイベント名ごとの受信数
    pub async fn dispatches_handled(&self) -> HashMap<String, u64> {
        self.dispatches_handled.lock().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.outbound.lock().await.is_some()
    }

    /// websocketを開きます。すでに接続処理中であれば、その完了を待って戻ります。
    pub async fn open(&self) -> Result<(), GatewayError> {
        let _guard = match self.open_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let _wait = self.open_lock.lock().await;
                return Ok(());
            }
        };

        self.user_closed.store(false, Ordering::SeqCst);
        // 前の接続へのcloseの通知が残っていれば捨てる
        let _ = self.close_signal.notified().now_or_never();

        // 新しい接続ではzlibもカウンタも最初から
        self.decoder.lock().await.reset();
        self.heartbeat_stats.lock().await.clear_counters();

        let url = self.state.lock().await.gateway_url.clone();
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (mut write, read) = stream.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
        let shard_id = self.shard_id;
        tokio::spawn(async move {
            while let Some(outbound) = rx.recv().await {
                let (frame, closing) = match outbound {
                    Outbound::Text(text) => (WsMessage::Text(text), false),
                    Outbound::Close { code, reason } => (
                        WsMessage::Close(Some(CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        })),
                        true,
                    ),
                };

                if let Err(e) = write.send(frame).await {
                    warn!(shard_id, error = %e, "Failed to write to gateway");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        *self.outbound.lock().await = Some(tx);
        *self.reader.lock().await = Some(read);
        info!(shard_id, "Gateway connection opened");
        Ok(())
    }

    /// 接続を閉じます。
    /// 読み込み中の`next_event`は、再接続しない場合`GatewayError::Closed`を返します。
    pub async fn close(&self, options: CloseOptions) -> Result<(), GatewayError> {
        if !options.reconnect {
            // 再接続の待機中に呼ばれた場合も止める
            self.user_closed.store(true, Ordering::SeqCst);
        }

        let Some(tx) = self.outbound.lock().await.take() else {
            return Ok(());
        };

        self.stop_heartbeat();
        let _ = tx.send(Outbound::Close { code: options.code, reason: options.reason.clone() });

        // 読み込み中ならnext_eventがreaderを捨てる
        self.close_signal.notify_one();
        if let Ok(mut reader) = self.reader.try_lock() {
            *reader = None;
        }

        info!(shard_id = self.shard_id, code = options.code, reason = %options.reason, "Gateway connection closed");

        if options.clear_session_id {
            let mut state = self.state.lock().await;
            state.session_id = None;
            state.sequence = None;
            // 間違ったシーケンスでハートビートしないようにカウンタも戻す
            self.heartbeat_stats.lock().await.clear_counters();
        }

        if options.reconnect {
            info!(shard_id = self.shard_id, "Reconnecting after 1s");
            self.reconnect_requested.store(true, Ordering::SeqCst);
        }

        Ok(())
    }

    pub async fn send(&self, payload: &Value) -> Result<(), GatewayError> {
        let text = serde_json::to_string(payload)?;
        let outbound = self.outbound.lock().await;
        let tx = outbound.as_ref().ok_or(GatewayError::NotConnected)?;
        tx.send(Outbound::Text(text)).map_err(|_| GatewayError::NotConnected)
    }

    pub async fn send_identify(&self) -> Result<(), GatewayError> {
        let payload = payload::identify(&*self.state.lock().await, &self.identify);
        self.send(&payload).await
    }

    pub async fn send_resume(&self) -> Result<(), GatewayError> {
        let payload = payload::resume(&*self.state.lock().await);
        self.send(&payload).await
    }

    /// ハートビートを送ります。ACKが返ってこない接続は1006で閉じて再接続します。
    pub async fn send_heartbeat(&self) -> Result<(), GatewayError> {
        let zombied = {
            let mut stats = self.heartbeat_stats.lock().await;
            stats.heartbeats += 1;
            stats.last_heartbeat_time = Some(Instant::now());
            if stats.is_zombied() {
                *stats = HeartbeatStats::default();
                true
            } else {
                false
            }
        };

        if zombied {
            warn!(shard_id = self.shard_id, "Connection has zombied, reconnecting.");
            // 1006ならRESUMEできるのでセッションは残す
            return self
                .close(CloseOptions {
                    code: 1006,
                    reason: "Zombied connection".into(),
                    reconnect: true,
                    clear_session_id: false,
                })
                .await;
        }

        let sequence = self.state.lock().await.sequence;
        debug!(shard_id = self.shard_id, ?sequence, "Heartbeating");
        self.send(&payload::heartbeat(sequence)).await
    }

    pub async fn send_guild_chunks(&self, guild_ids: &[u64]) -> Result<(), GatewayError> {
        for guild_id in guild_ids {
            self.send(&payload::request_guild_members(*guild_id)).await?;
        }
        Ok(())
    }

    pub async fn send_status(&self, presence: &Presence) -> Result<(), GatewayError> {
        let payload = payload::presence(presence, chrono::Utc::now().timestamp_millis());
        self.send(&payload).await
    }

    fn start_heartbeat(self: &Arc<Self>, interval: Duration) {
        self.heartbeat_generation.send_modify(|g| *g += 1);

        // 購読時点の世代は既読なので、次の変更で止まる
        let mut rx = self.heartbeat_generation.subscribe();
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = rx.changed() => break,
                }

                if let Err(e) = gateway.send_heartbeat().await {
                    debug!(shard_id = gateway.shard_id, error = %e, "Heartbeat task stopped");
                    break;
                }
            }
        });
    }

    fn stop_heartbeat(&self) {
        self.heartbeat_generation.send_modify(|g| *g += 1);
    }

    /// 受信データを処理し、生成されたイベントを返します。
    pub async fn handle_data(self: &Arc<Self>, data: GatewayData) -> Result<Vec<GatewayEvent>, GatewayError> {
        let text = match data {
            GatewayData::Text(text) => text,
            GatewayData::Binary(bytes) => match self.decoder.lock().await.push(&bytes)? {
                Some(text) => text,
                None => return Ok(vec![]),
            },
        };

        if text.is_empty() {
            return Ok(vec![]);
        }

        let frame: GatewayFrame = serde_json::from_str(&text)?;
        if let Some(sequence) = frame.s {
            self.state.lock().await.sequence = Some(sequence);
        }

        let op = match GatewayOp::try_from(frame.op) {
            Ok(op) => op,
            Err(code) => {
                warn!(shard_id = self.shard_id, code, "Unknown opcode");
                return Ok(vec![]);
            }
        };

        match op {
            GatewayOp::Hello => {
                let interval_ms = frame.d.get("heartbeat_interval").and_then(Value::as_u64).unwrap_or(45_000);
                let interval = Duration::from_millis(interval_ms);
                debug!(shard_id = self.shard_id, ?interval, "Starting heartbeat");

                self.send_heartbeat().await?;
                if !self.is_connected().await {
                    // ゾンビ判定で閉じた。再接続に任せる
                    return Ok(vec![]);
                }
                self.start_heartbeat(interval);

                let trace: Vec<String> = frame
                    .d
                    .get("_trace")
                    .and_then(|t| serde_json::from_value(t.clone()).ok())
                    .unwrap_or_default();
                info!(shard_id = self.shard_id, trace = %trace.join(", "), "Connected to Discord servers");

                let has_session = self.state.lock().await.session_id.is_some();
                if has_session {
                    info!(shard_id = self.shard_id, "We already have a session ID, sending RESUME...");
                    self.send_resume().await?;
                } else {
                    info!(shard_id = self.shard_id, "Sending IDENTIFY...");
                    self.send_identify().await?;
                }

                // 接続処理が終わってからイベントを出す
                Ok(vec![GatewayEvent::Hello { trace }])
            }

            GatewayOp::Heartbeat => {
                self.send_heartbeat().await?;
                Ok(vec![GatewayEvent::HeartbeatReceived])
            }

            GatewayOp::HeartbeatAck => {
                let mut stats = self.heartbeat_stats.lock().await;
                stats.heartbeat_acks += 1;
                stats.last_ack_time = Some(Instant::now());
                Ok(vec![GatewayEvent::HeartbeatAck])
            }

            GatewayOp::InvalidateSession => {
                // dはRESUMEできるかどうか。無ければfalse扱い
                let resumable = frame.d.as_bool().unwrap_or(false);

                if resumable {
                    debug!(shard_id = self.shard_id, "Sending RESUME again");
                    self.send_resume().await?;
                } else {
                    warn!(shard_id = self.shard_id, "Received INVALIDATE_SESSION with d False, re-identifying.");
                    {
                        let mut state = self.state.lock().await;
                        state.sequence = None;
                        state.session_id = None;
                    }
                    // 1～5秒のランダムな待機が必要
                    let wait = rand::thread_rng().gen_range(1..=5);
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    self.send_identify().await?;
                }

                Ok(vec![GatewayEvent::InvalidateSession { resumable }])
            }

            GatewayOp::Dispatch => {
                let Some(name) = frame.t else {
                    return Ok(vec![]);
                };

                if name == "READY" {
                    let session_id = frame.d.get("session_id").and_then(Value::as_str).map(str::to_string);
                    self.state.lock().await.session_id = session_id;
                }

                *self.dispatches_handled.lock().await.entry(name.clone()).or_insert(0) += 1;
                Ok(vec![GatewayEvent::Dispatch { name, data: frame.d }])
            }

            GatewayOp::Reconnect => {
                info!(shard_id = self.shard_id, "Being asked to reconnect...");
                self.close(CloseOptions {
                    code: 1000,
                    reason: "Server asked to reconnect".into(),
                    reconnect: true,
                    clear_session_id: false,
                })
                .await?;
                Ok(vec![])
            }

            other => {
                warn!(shard_id = self.shard_id, op = ?other, "Unhandled opcode");
                Ok(vec![])
            }
        }
    }

    /// 次のイベントを待ちます。切断された場合は1秒後に再接続します。
    /// 再接続なしで`close`された場合は`GatewayError::Closed`を返します。
    pub async fn next_event(self: &Arc<Self>) -> Result<GatewayEvent, GatewayError> {
        loop {
            if let Some(event) = self.pending.lock().await.pop_front() {
                return Ok(event);
            }

            if self.reconnect_requested.swap(false, Ordering::SeqCst) {
                tokio::time::sleep(RECONNECT_DELAY).await;
                if self.user_closed.load(Ordering::SeqCst) {
                    return Err(GatewayError::Closed);
                }
                if let Err(e) = self.open().await {
                    warn!(shard_id = self.shard_id, error = %e, "Failed to reconnect, retrying in 1s");
                    self.reconnect_requested.store(true, Ordering::SeqCst);
                }
                continue;
            }

            let message = {
                let mut reader = self.reader.lock().await;
                let Some(stream) = reader.as_mut() else {
                    return Err(GatewayError::Closed);
                };

                let read = tokio::select! {
                    message = stream.next() => Some(message),
                    _ = self.close_signal.notified() => None,
                };
                if read.is_none() {
                    *reader = None;
                }
                read
            };
            // closeされた。再接続するかどうかは次のループで判断する
            let Some(message) = message else {
                continue;
            };

            let data = match message {
                Some(Ok(WsMessage::Text(text))) => GatewayData::Text(text),
                Some(Ok(WsMessage::Binary(bytes))) => GatewayData::Binary(bytes),
                Some(Ok(WsMessage::Close(frame))) => {
                    let code = frame.as_ref().map(|f| u16::from(f.code));
                    if code == Some(CLOSE_AUTHENTICATION_FAILED) {
                        self.reconnect_after_close().await;
                        self.reconnect_requested.store(false, Ordering::SeqCst);
                        return Err(GatewayError::AuthenticationFailed);
                    }
                    warn!(shard_id = self.shard_id, ?code, "Websocket closed, reconnecting in 1s");
                    self.reconnect_after_close().await;
                    continue;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!(shard_id = self.shard_id, error = %e, "Websocket error, reconnecting in 1s");
                    self.reconnect_after_close().await;
                    continue;
                }
                None => {
                    warn!(shard_id = self.shard_id, "Websocket stream ended, reconnecting in 1s");
                    self.reconnect_after_close().await;
                    continue;
                }
            };

            match self.handle_data(data).await {
                Ok(events) => self.pending.lock().await.extend(events),
                // 処理中に閉じられた。readerも無いので次のループで判断する
                Err(GatewayError::NotConnected) => continue,
                Err(GatewayError::Json(e)) => {
                    warn!(shard_id = self.shard_id, error = %e, "Ignoring malformed payload");
                }
                Err(e @ (GatewayError::Decompress(_) | GatewayError::Utf8(_))) => {
                    warn!(shard_id = self.shard_id, error = %e, "Corrupted stream, reconnecting in 1s");
                    self.reconnect_after_close().await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn reconnect_after_close(&self) {
        self.stop_heartbeat();
        self.outbound.lock().await.take();
        self.reader.lock().await.take();
        // 前の接続で未応答のハートビートを引き継がない
        self.heartbeat_stats.lock().await.clear_counters();
        self.reconnect_requested.store(true, Ordering::SeqCst);
    }
}

/// ゲートウェイURLに接続パラメータを付けてハンドラを作成し、接続します。
pub async fn open_gateway(
    token: &str,
    url: &str,
    shard_id: u32,
    shard_count: u32,
    identify: IdentifyOptions,
) -> Result<Arc<GatewayHandler>, GatewayError> {
    let url = gateway_url_with_params(url);
    let state = GatewayState::new(token, url.clone(), shard_id, shard_count);
    let gateway = GatewayHandler::new(state, identify);

    info!(shard_id, url = %url, "Opening gateway connection");
    gateway.open().await?;
    Ok(gateway)
}

pub fn gateway_url_with_params(url: &str) -> String {
    format!("{}/?v={}&encoding=json&compress=zlib-stream", url.trim_end_matches('/'), GATEWAY_VERSION)
}
