//! ボットごとの変数
//!
//! コンテキスト変数と同じget/set/resetを持ちますが、値はタスクではなく
//! 現在のクライアント(`CURRENT_BOT`)に保存されます。同じボットの全てのタスクから見え、
//! 別のボットからは見えません。

use std::{
    any::Any,
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::{
    bot::client::Client,
    context::{ContextError, CURRENT_BOT},
};

/// [`BotVar::set`] が返すトークン
#[derive(Debug)]
#[must_use = "resetに渡さないと以前の値に戻せません"]
pub struct BotVarToken {
    name: String,
    previous: Option<Arc<dyn Any + Send + Sync>>,
}

impl BotVarToken {
    /// set前に値が存在したかどうか
    pub fn had_previous(&self) -> bool {
        self.previous.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct BotVar<T> {
    name: String,
    default: Option<T>,
}

impl<T> PartialEq for BotVar<T> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<T> Eq for BotVar<T> {}

impl<T> Hash for BotVar<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl<T: Clone + Send + Sync + 'static> BotVar<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), default: None }
    }

    pub fn with_default(name: impl Into<String>, default: T) -> Self {
        Self { name: name.into(), default: Some(default) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 現在のボットに保存されている値を取得します。
    pub async fn get(&self) -> Result<T, ContextError> {
        let bot = CURRENT_BOT.get()?;
        self.get_on(&bot).await
    }

    pub async fn get_on(&self, bot: &Client) -> Result<T, ContextError> {
        let locals = bot.locals().read().await;
        match locals.get(&self.name) {
            Some(value) => value
                .downcast_ref::<T>()
                .cloned()
                .ok_or_else(|| ContextError::TypeMismatch(self.name.clone())),
            None => self.default.clone().ok_or_else(|| ContextError::Unset(self.name.clone())),
        }
    }

    pub async fn set(&self, value: T) -> Result<BotVarToken, ContextError> {
        let bot = CURRENT_BOT.get()?;
        Ok(self.set_on(&bot, value).await)
    }

    pub async fn set_on(&self, bot: &Client, value: T) -> BotVarToken {
        let previous = bot.locals().write().await.insert(self.name.clone(), Arc::new(value));
        BotVarToken { name: self.name.clone(), previous }
    }

    /// `token`を作ったsetの前の状態に戻します。以前に値が無かった場合は削除されます。
    pub async fn reset(&self, token: BotVarToken) -> Result<(), ContextError> {
        let bot = CURRENT_BOT.get()?;
        self.reset_on(&bot, token).await
    }

    pub async fn reset_on(&self, bot: &Client, token: BotVarToken) -> Result<(), ContextError> {
        if token.name != self.name {
            return Err(ContextError::ForeignToken(token.name));
        }

        let mut locals = bot.locals().write().await;
        match token.previous {
            Some(previous) => {
                locals.insert(self.name.clone(), previous);
            }
            None => {
                locals.remove(&self.name);
            }
        }
        Ok(())
    }
}
