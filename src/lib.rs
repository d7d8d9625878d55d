pub mod bot;
pub mod botvar;
pub mod context;
pub mod event;
pub mod gateway;

#[macro_use]
mod macros;

pub use bot::{client::Client, config::BotConfig};
pub use botvar::{BotVar, BotVarToken};
pub use context::{ContextError, ContextVar, Token, CURRENT_BOT, EVENT_CONTEXT};
pub use event::{context::EventContext, manager::{Dispatch, EventManager, ListenerControl}};
pub use gateway::{GatewayEvent, GatewayHandler, payload::{Activity, Presence}};
