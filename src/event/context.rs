use std::sync::Arc;

use crate::{
    bot::client::{Client, ClientError},
    context::{ContextError, EVENT_CONTEXT},
    event::manager::EventHandler,
    gateway::{payload::Presence, GatewayHandler},
};

/// イベントに渡される、発火元のクライアントとシャードの情報
#[derive(Clone)]
pub struct EventContext {
    /// このイベントを受け取ったクライアント
    pub bot: Client,
    /// イベントを受信したシャード
    pub shard_id: u32,
    pub shard_count: u32,
    pub event_name: String,
}

impl std::fmt::Debug for EventContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventContext")
            .field("shard_id", &self.shard_id)
            .field("shard_count", &self.shard_count)
            .field("event_name", &self.event_name)
            .finish()
    }
}

impl EventContext {
    pub fn new(bot: Client, shard_id: u32, event_name: impl Into<String>) -> Self {
        let shard_count = bot.shard_count();
        Self {
            bot,
            shard_id,
            shard_count,
            event_name: event_name.into(),
        }
    }

    /// 現在処理中のイベントのコンテキスト
    pub fn current() -> Result<Self, ContextError> {
        EVENT_CONTEXT.get()
    }

    pub fn with_event_name(&self, event_name: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            ..self.clone()
        }
    }

    /// このイベントに登録されているハンドラ
    pub async fn handlers(&self) -> Vec<EventHandler> {
        self.bot.events().handlers(&self.event_name).await
    }

    /// このシャードのステータスを変更します。
    pub async fn change_status(&self, presence: Presence) -> Result<(), ClientError> {
        self.bot.change_status(&presence, self.shard_id).await
    }

    /// イベントを受信したゲートウェイ
    pub async fn gateway(&self) -> Result<Arc<GatewayHandler>, ClientError> {
        self.bot.gateway(self.shard_id).await
    }
}
