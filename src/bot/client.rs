use std::{collections::HashMap, sync::Arc, time::Duration};

use serde::Deserialize;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::{
    arc_rwlock,
    bot::{
        bot_context::{BotContext, BotLocals},
        config::BotConfig,
    },
    context::{ContextError, CURRENT_BOT},
    event::{
        context::EventContext,
        manager::{Dispatch, EventManager},
    },
    gateway::{
        open_gateway,
        payload::{IdentifyOptions, Presence},
        CloseOptions, GatewayError, GatewayEvent, GatewayHandler,
    },
};

/// IDENTIFYの間隔
const IDENTIFY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("シャード {0} のゲートウェイがありません(UnknownShard)")]
    UnknownShard(u32),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("HTTPエラー: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// `GET /gateway/bot`の結果
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct GatewayInfo {
    pub url: String,
    #[serde(default = "default_shards")]
    pub shards: u32,
}

fn default_shards() -> u32 {
    1
}

/// ボットのクライアント。クローンしても同じ状態を共有します。
#[derive(Clone)]
pub struct Client {
    ctx: Arc<BotContext>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("shard_count", &self.shard_count()).finish_non_exhaustive()
    }
}

impl Client {
    pub fn new(config: BotConfig) -> Self {
        let ctx = BotContext {
            config: Arc::new(config),
            events: EventManager::new(),
            gateways: arc_rwlock!(HashMap::new()),
            locals: arc_rwlock!(HashMap::new()),
        };

        Self { ctx: Arc::new(ctx) }
    }

    /// 現在のタスクで動作しているクライアント
    pub fn current() -> Result<Self, ContextError> {
        CURRENT_BOT.get()
    }

    pub fn config(&self) -> &BotConfig {
        &self.ctx.config
    }

    pub fn shard_count(&self) -> u32 {
        self.ctx.config.shard_count()
    }

    pub fn events(&self) -> &EventManager {
        &self.ctx.events
    }

    pub(crate) fn locals(&self) -> &tokio::sync::RwLock<BotLocals> {
        &self.ctx.locals
    }

    /// 同じ状態を共有するクライアントかどうか
    pub fn ptr_eq(&self, other: &Client) -> bool {
        Arc::ptr_eq(&self.ctx, &other.ctx)
    }

    pub async fn gateway(&self, shard_id: u32) -> Result<Arc<GatewayHandler>, ClientError> {
        self.ctx
            .gateways
            .read()
            .await
            .get(&shard_id)
            .cloned()
            .ok_or(ClientError::UnknownShard(shard_id))
    }

    pub async fn insert_gateway(&self, gateway: Arc<GatewayHandler>) {
        self.ctx.gateways.write().await.insert(gateway.shard_id(), gateway);
    }

    /// 指定したシャードのステータスを変更します。
    pub async fn change_status(&self, presence: &Presence, shard_id: u32) -> Result<(), ClientError> {
        let gateway = self.gateway(shard_id).await?;
        gateway.send_status(presence).await?;
        Ok(())
    }

    /// 接続先のゲートウェイURLと推奨シャード数を取得します。
    pub async fn fetch_gateway_info(&self) -> Result<GatewayInfo, ClientError> {
        let url = format!("{}/gateway/bot", self.config().api_base().trim_end_matches('/'));
        let info = reqwest::Client::new()
            .get(url)
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.config().token()))
            .send()
            .await?
            .error_for_status()?
            .json::<GatewayInfo>()
            .await?;
        Ok(info)
    }

    /// ゲートウェイのイベントをイベントマネージャーに流します。
    /// DISPATCHはイベント名を小文字にしたものでも発火します(`MESSAGE_CREATE` → `message_create`)。
    pub async fn handle_gateway_event(&self, shard_id: u32, event: GatewayEvent) -> Vec<Dispatch> {
        let ctx = EventContext::new(self.clone(), shard_id, event.name());
        let mut dispatches = vec![self.events().fire_event(event.name(), ctx.clone(), event.payload()).await];

        if let GatewayEvent::Dispatch { name, data } = event {
            let name = name.to_lowercase();
            dispatches.push(self.events().fire_event(&name, ctx, data).await);
        }

        dispatches
    }

    /// 全てのシャードに接続し、切断されるまでイベントを処理します。
    pub async fn run(&self) -> Result<(), ClientError> {
        CURRENT_BOT.scope(Some(self.clone()), self.run_shards()).await
    }

    async fn run_shards(&self) -> Result<(), ClientError> {
        let url = match self.config().gateway_url() {
            Some(url) => url,
            None => self.fetch_gateway_info().await?.url,
        };

        let identify = IdentifyOptions {
            intents: self.config().gateway_intents(),
            large_threshold: self.config().large_threshold(),
        };

        let mut shards = JoinSet::new();
        for shard_id in 0..self.shard_count() {
            if shard_id > 0 {
                tokio::time::sleep(IDENTIFY_INTERVAL).await;
            }

            let gateway = open_gateway(&self.config().token(), &url, shard_id, self.shard_count(), identify).await?;
            self.insert_gateway(gateway.clone()).await;

            let client = self.clone();
            shards.spawn(CURRENT_BOT.inherit(async move { client.pump_shard(gateway).await }));
        }

        while let Some(result) = shards.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Shard stopped"),
                Err(e) => error!(error = %e, "Shard task panicked"),
            }
        }

        info!("All shards have stopped");
        Ok(())
    }

    async fn pump_shard(&self, gateway: Arc<GatewayHandler>) -> Result<(), GatewayError> {
        let shard_id = gateway.shard_id();
        loop {
            match gateway.next_event().await {
                Ok(event) => {
                    self.handle_gateway_event(shard_id, event).await;
                }
                // closeで閉じられた。それ以外の停止はrun_shardsでログに出す
                Err(GatewayError::Closed) => {
                    info!(shard_id, "Shard closed");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 全てのシャードの接続を閉じます。
    pub async fn close(&self) -> Result<(), ClientError> {
        let gateways: Vec<Arc<GatewayHandler>> = self.ctx.gateways.read().await.values().cloned().collect();
        for gateway in gateways {
            gateway.close(CloseOptions { reason: "Closing bot".into(), ..Default::default() }).await?;
        }
        Ok(())
    }
}
