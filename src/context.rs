//! タスク単位で値を保持するコンテキスト変数
//!
//! tokioのタスクはtask-localを共有しないため、spawnするタスクに値を引き継ぐ場合は
//! [`ContextVar::inherit`] で明示的に包む必要があります。

use std::{cell::RefCell, future::Future, sync::atomic::{AtomicU64, Ordering}};

use thiserror::Error;
use tokio::task::LocalKey;

use crate::{bot::client::Client, event::context::EventContext};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("コンテキストの外からアクセスされました(NoContext): {0}")]
    NoContext(String),
    #[error("値が設定されていません(Unset): {0}")]
    Unset(String),
    #[error("このトークンは別の変数のものです(ForeignToken): {0}")]
    ForeignToken(String),
    #[error("このトークンは別のコンテキストで作成されました(WrongContext): {0}")]
    WrongContext(String),
    #[error("保存されている値の型が一致しません(TypeMismatch): {0}")]
    TypeMismatch(String),
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// 1つのコンテキストが持つ値
#[doc(hidden)]
pub struct Slot<T> {
    context_id: u64,
    value: Option<T>,
}

impl<T> Slot<T> {
    fn new(value: Option<T>) -> Self {
        Self {
            context_id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            value,
        }
    }
}

/// [`ContextVar::set`] が返すトークン。resetに渡すと消費されます。
#[derive(Debug)]
#[must_use = "resetに渡さないと以前の値に戻せません"]
pub struct Token<T> {
    var_id: usize,
    var_name: &'static str,
    context_id: u64,
    previous: Option<T>,
}

impl<T> Token<T> {
    /// setされる前の値
    pub fn previous(&self) -> Option<&T> {
        self.previous.as_ref()
    }
}

pub struct ContextVar<T: 'static> {
    name: &'static str,
    key: &'static LocalKey<RefCell<Slot<T>>>,
}

impl<T: Clone + 'static> ContextVar<T> {
    pub const fn new(name: &'static str, key: &'static LocalKey<RefCell<Slot<T>>>) -> Self {
        Self { name, key }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn id(&self) -> usize {
        self.key as *const LocalKey<RefCell<Slot<T>>> as usize
    }

    /// 新しいコンテキストを作成し、その中で`fut`を実行します。
    pub async fn scope<F: Future>(&self, initial: Option<T>, fut: F) -> F::Output {
        self.key.scope(RefCell::new(Slot::new(initial)), fut).await
    }

    /// 現在の値を引き継いだ新しいコンテキストで`fut`を包みます。
    /// 引き継いだ先でのsetは呼び出し元に影響しません。
    pub fn inherit<F: Future>(&self, fut: F) -> impl Future<Output = F::Output> + use<T, F> {
        self.key.scope(RefCell::new(Slot::new(self.snapshot())), fut)
    }

    /// 引き継ぎ用に現在の値を複製します。スコープ外や未設定ならNone
    pub fn snapshot(&self) -> Option<T> {
        self.key.try_with(|slot| slot.borrow().value.clone()).ok().flatten()
    }

    pub fn get(&self) -> Result<T, ContextError> {
        self.key
            .try_with(|slot| slot.borrow().value.clone())
            .map_err(|_| ContextError::NoContext(self.name.to_string()))?
            .ok_or_else(|| ContextError::Unset(self.name.to_string()))
    }

    pub fn try_get(&self) -> Option<T> {
        self.get().ok()
    }

    /// 値を置き換え、以前の値を覚えたトークンを返します。
    pub fn set(&self, value: T) -> Result<Token<T>, ContextError> {
        self.key
            .try_with(|slot| {
                let mut slot = slot.borrow_mut();
                let previous = slot.value.replace(value);
                Token {
                    var_id: self.id(),
                    var_name: self.name,
                    context_id: slot.context_id,
                    previous,
                }
            })
            .map_err(|_| ContextError::NoContext(self.name.to_string()))
    }

    /// `token`を作ったsetの直前の値に戻します。
    pub fn reset(&self, token: Token<T>) -> Result<(), ContextError> {
        if token.var_id != self.id() {
            return Err(ContextError::ForeignToken(token.var_name.to_string()));
        }

        self.key
            .try_with(|slot| {
                let mut slot = slot.borrow_mut();
                if slot.context_id != token.context_id {
                    return Err(ContextError::WrongContext(self.name.to_string()));
                }
                slot.value = token.previous;
                Ok(())
            })
            .map_err(|_| ContextError::NoContext(self.name.to_string()))?
    }
}

tokio::task_local! {
    static CURRENT_BOT_SLOT: RefCell<Slot<Client>>;
    static EVENT_CONTEXT_SLOT: RefCell<Slot<EventContext>>;
}

/// 現在のタスクで動作しているクライアント
pub static CURRENT_BOT: ContextVar<Client> = ContextVar::new("current_bot", &CURRENT_BOT_SLOT);

/// 現在処理中のイベントのコンテキスト
pub static EVENT_CONTEXT: ContextVar<EventContext> =
    ContextVar::new("event_context", &EVENT_CONTEXT_SLOT);
