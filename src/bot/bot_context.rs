use std::{any::Any, collections::HashMap, sync::Arc};

use tokio::sync::RwLock;

use crate::{bot::config::BotConfig, event::manager::EventManager, gateway::GatewayHandler};

pub type BotLocals = HashMap<String, Arc<dyn Any + Send + Sync>>;

/// 1つのクライアントが共有する状態
pub struct BotContext {
    pub config: Arc<BotConfig>,
    pub events: EventManager,
    pub gateways: Arc<RwLock<HashMap<u32, Arc<GatewayHandler>>>>,
    /// BotVarの保存先
    pub locals: Arc<RwLock<BotLocals>>,
}
