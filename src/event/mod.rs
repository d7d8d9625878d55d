//! イベントの発火と、ハンドラに渡されるコンテキスト

pub mod context;
pub mod manager;

pub use context::EventContext;
pub use manager::{Dispatch, EventError, EventManager, HandlerId, HookId, ListenerControl, ListenerId};
