use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use serde_json::Value;
use thiserror::Error;
use tokio::{
    sync::{oneshot, Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, error, warn};

use crate::{
    arc_rwlock,
    context::{CURRENT_BOT, EVENT_CONTEXT},
    event::context::EventContext,
    impl_error_partial_eq,
};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

pub type EventHandler = Arc<dyn Fn(EventContext, Value) -> BoxFuture<anyhow::Result<()>> + Send + Sync>;
pub type TemporaryListener = Arc<dyn Fn(EventContext, Value) -> BoxFuture<anyhow::Result<ListenerControl>> + Send + Sync>;
pub type EventHook = Arc<dyn Fn(EventContext, Value) -> BoxFuture<()> + Send + Sync>;

/// 一時リスナーの継続・終了
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerControl {
    Continue,
    Exit,
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("イベント待機がタイムアウトしました(Timeout)")]
    Timeout,
    #[error("イベントを受け取る前にリスナーが削除されました(ListenerDropped)")]
    ListenerDropped,
    #[error("wait_forの条件でエラーが発生しました: {0}")]
    Predicate(anyhow::Error),
}

impl_error_partial_eq!(EventError { Timeout, ListenerDropped }, opaque { Predicate });

static NEXT_REGISTRATION_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_REGISTRATION_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

struct Registered<F> {
    id: u64,
    func: F,
}

/// fire_eventで起動したタスク群
#[derive(Debug, Default)]
pub struct Dispatch {
    tasks: Vec<JoinHandle<()>>,
}

impl Dispatch {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 全てのタスクの終了を待ちます。
    pub async fn finished(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Event task panicked");
            }
        }
    }
}

/// `wait_for`の登録済みリスナー
struct Waiter {
    manager: EventManager,
    event_name: String,
    id: ListenerId,
    rx: oneshot::Receiver<anyhow::Result<Value>>,
}

impl Waiter {
    async fn wait(mut self) -> Result<Value, EventError> {
        match (&mut self.rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(EventError::Predicate(e)),
            Err(_) => Err(EventError::ListenerDropped),
        }
    }

    async fn wait_timeout(self, timeout: Duration) -> Result<Value, EventError> {
        tokio::time::timeout(timeout, self.wait()).await.map_err(|_| EventError::Timeout)?
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        // 待機を途中で止めた場合もリスナーを残さない
        if let Ok(mut listeners) = self.manager.temporary_listeners.try_write() {
            remove_registered(&mut listeners, &self.event_name, self.id.0);
            return;
        }

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let manager = self.manager.clone();
            let (event_name, id) = (std::mem::take(&mut self.event_name), self.id);
            handle.spawn(async move {
                manager.remove_listener_early(&event_name, id).await;
            });
        }
    }
}

/// イベントハンドラ・一時リスナー・フックを管理し、イベントを発火します。
#[derive(Clone)]
pub struct EventManager {
    event_hooks: Arc<RwLock<Vec<Registered<EventHook>>>>,
    event_listeners: Arc<RwLock<HashMap<String, Vec<Registered<EventHandler>>>>>,
    temporary_listeners: Arc<RwLock<HashMap<String, Vec<Registered<TemporaryListener>>>>>,
}

impl EventManager {
    pub fn new() -> Self {
        Self {
            event_hooks: arc_rwlock!(Vec::new()),
            event_listeners: arc_rwlock!(HashMap::new()),
            temporary_listeners: arc_rwlock!(HashMap::new()),
        }
    }

    // ハンドラ

    pub async fn add_event<F, Fut>(&self, event_name: &str, func: F) -> HandlerId
    where
        F: Fn(EventContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: EventHandler = Arc::new(move |ctx: EventContext, payload: Value| {
            Box::pin(func(ctx, payload)) as BoxFuture<anyhow::Result<()>>
        });
        self.add_event_handler(event_name, handler).await
    }

    pub async fn add_event_handler(&self, event_name: &str, handler: EventHandler) -> HandlerId {
        let id = next_id();
        debug!(event = event_name, id, "Registered event handler");
        self.event_listeners
            .write()
            .await
            .entry(event_name.to_string())
            .or_default()
            .push(Registered { id, func: handler });
        HandlerId(id)
    }

    /// 同じハンドラを複数のイベント名で登録します。
    pub async fn add_event_many<F, Fut>(&self, event_names: &[&str], func: F) -> Vec<HandlerId>
    where
        F: Fn(EventContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: EventHandler = Arc::new(move |ctx: EventContext, payload: Value| {
            Box::pin(func(ctx, payload)) as BoxFuture<anyhow::Result<()>>
        });
        let mut ids = Vec::with_capacity(event_names.len());
        for name in event_names {
            ids.push(self.add_event_handler(name, handler.clone()).await);
        }
        ids
    }

    pub async fn remove_event(&self, event_name: &str, id: HandlerId) -> bool {
        remove_registered(&mut *self.event_listeners.write().await, event_name, id.0)
    }

    /// イベント名に登録されているハンドラ
    pub async fn handlers(&self, event_name: &str) -> Vec<EventHandler> {
        self.event_listeners
            .read()
            .await
            .get(event_name)
            .map(|list| list.iter().map(|r| r.func.clone()).collect())
            .unwrap_or_default()
    }

    // 一時リスナー

    /// 一時リスナーを追加します。リスナーが`ListenerControl::Exit`かエラーを返すと削除されます。
    pub async fn add_temporary_listener<F, Fut>(&self, event_name: &str, func: F) -> ListenerId
    where
        F: Fn(EventContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ListenerControl>> + Send + 'static,
    {
        let id = next_id();
        let listener: TemporaryListener = Arc::new(move |ctx: EventContext, payload: Value| {
            Box::pin(func(ctx, payload)) as BoxFuture<anyhow::Result<ListenerControl>>
        });
        self.temporary_listeners
            .write()
            .await
            .entry(event_name.to_string())
            .or_default()
            .push(Registered { id, func: listener });
        ListenerId(id)
    }

    pub async fn remove_listener_early(&self, event_name: &str, id: ListenerId) -> bool {
        remove_registered(&mut *self.temporary_listeners.write().await, event_name, id.0)
    }

    pub async fn temporary_listener_count(&self, event_name: &str) -> usize {
        self.temporary_listeners.read().await.get(event_name).map_or(0, Vec::len)
    }

    // フック

    /// 全てのイベントで、ハンドラより先に起動されるフックを追加します。
    pub async fn add_event_hook<F, Fut>(&self, func: F) -> HookId
    where
        F: Fn(EventContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = next_id();
        warn!(id, "Adding event hook");
        let hook: EventHook = Arc::new(move |ctx: EventContext, payload: Value| {
            Box::pin(func(ctx, payload)) as BoxFuture<()>
        });
        self.event_hooks.write().await.push(Registered { id, func: hook });
        HookId(id)
    }

    pub async fn remove_event_hook(&self, id: HookId) -> bool {
        let mut hooks = self.event_hooks.write().await;
        let before = hooks.len();
        hooks.retain(|r| r.id != id.0);
        hooks.len() != before
    }

    // 待機

    async fn register_waiter<P, Fut>(&self, event_name: &str, predicate: P) -> Waiter
    where
        P: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let predicate = Arc::new(predicate);

        let id = self
            .add_temporary_listener(event_name, move |_ctx, payload| {
                let tx = tx.clone();
                let predicate = predicate.clone();
                async move {
                    let outcome = match predicate(payload.clone()).await {
                        Ok(true) => Ok(payload),
                        Ok(false) => return Ok(ListenerControl::Continue),
                        Err(e) => {
                            warn!(error = %e, "Exception in wait_for predicate");
                            Err(e)
                        }
                    };

                    // 同時に発火した場合も最初の1件だけを返す
                    if let Some(tx) = tx.lock().await.take() {
                        let _ = tx.send(outcome);
                    }
                    Ok(ListenerControl::Exit)
                }
            })
            .await;

        Waiter { manager: self.clone(), event_name: event_name.to_string(), id, rx }
    }

    async fn register_sync_waiter<P>(&self, event_name: &str, predicate: P) -> Waiter
    where
        P: Fn(&Value) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.register_waiter(event_name, move |payload: Value| std::future::ready(predicate(&payload)))
            .await
    }

    /// `predicate`がtrueを返すイベントを待ち、そのペイロードを返します。
    pub async fn wait_for<P>(&self, event_name: &str, predicate: P) -> Result<Value, EventError>
    where
        P: Fn(&Value) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.register_sync_waiter(event_name, predicate).await.wait().await
    }

    /// 条件の判定にawaitが必要な場合の[`EventManager::wait_for`]
    pub async fn wait_for_async<P, Fut>(&self, event_name: &str, predicate: P) -> Result<Value, EventError>
    where
        P: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        self.register_waiter(event_name, predicate).await.wait().await
    }

    /// 次のイベントを条件なしで待ちます。
    pub async fn wait_for_any(&self, event_name: &str) -> Result<Value, EventError> {
        self.wait_for(event_name, |_| Ok(true)).await
    }

    pub async fn wait_for_timeout<P>(&self, event_name: &str, predicate: P, timeout: Duration) -> Result<Value, EventError>
    where
        P: Fn(&Value) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.register_sync_waiter(event_name, predicate).await.wait_timeout(timeout).await
    }

    /// 先にリスナーを登録してから`action`を実行し、その後イベントを待ちます。
    /// `action`の結果として届くイベントを取りこぼしません。
    pub async fn wait_for_during<P, A>(&self, event_name: &str, predicate: P, action: A) -> Result<(A::Output, Value), EventError>
    where
        P: Fn(&Value) -> anyhow::Result<bool> + Send + Sync + 'static,
        A: Future,
    {
        let waiter = self.register_sync_waiter(event_name, predicate).await;
        let output = action.await;
        let value = waiter.wait().await?;
        Ok((output, value))
    }

    // 発火

    /// 現在のcurrent_botとevent_contextを引き継いでタスクを起動します。
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        tokio::spawn(CURRENT_BOT.inherit(EVENT_CONTEXT.inherit(fut)))
    }

    /// イベントを発火します。フック、ハンドラ、一時リスナーの順にタスクを起動し、
    /// それぞれのタスクではcurrent_botとevent_contextがこのイベントのものになります。
    pub async fn fire_event(&self, event_name: &str, ctx: EventContext, payload: Value) -> Dispatch {
        // イベント名は常に上書き
        let ctx = ctx.with_event_name(event_name);
        let bot = ctx.bot.clone();

        CURRENT_BOT
            .scope(Some(bot), EVENT_CONTEXT.scope(Some(ctx.clone()), self.spawn_all(event_name, ctx, payload)))
            .await
    }

    async fn spawn_all(&self, event_name: &str, ctx: EventContext, payload: Value) -> Dispatch {
        let mut dispatch = Dispatch::default();

        let hooks: Vec<EventHook> = self.event_hooks.read().await.iter().map(|r| r.func.clone()).collect();
        for hook in hooks {
            dispatch.tasks.push(self.spawn(hook(ctx.clone(), payload.clone())));
        }

        for handler in self.handlers(event_name).await {
            let fut = handler(ctx.clone(), payload.clone());
            let name = event_name.to_string();
            dispatch.tasks.push(self.spawn(async move {
                if let Err(e) = fut.await {
                    error!(event = %name, error = ?e, "Unhandled error in event handler");
                }
            }));
        }

        let listeners: Vec<(u64, TemporaryListener)> = self
            .temporary_listeners
            .read()
            .await
            .get(event_name)
            .map(|list| list.iter().map(|r| (r.id, r.func.clone())).collect())
            .unwrap_or_default();

        for (id, listener) in listeners {
            let fut = listener(ctx.clone(), payload.clone());
            let manager = self.clone();
            let name = event_name.to_string();
            dispatch.tasks.push(self.spawn(async move {
                match fut.await {
                    Ok(ListenerControl::Continue) => {}
                    Ok(ListenerControl::Exit) => {
                        manager.remove_listener_early(&name, ListenerId(id)).await;
                    }
                    Err(e) => {
                        error!(event = %name, error = ?e, "Unhandled error in listener");
                        manager.remove_listener_early(&name, ListenerId(id)).await;
                    }
                }
            }));
        }

        dispatch
    }
}

fn remove_registered<F>(map: &mut HashMap<String, Vec<Registered<F>>>, event_name: &str, id: u64) -> bool {
    let Some(list) = map.get_mut(event_name) else {
        return false;
    };

    let before = list.len();
    list.retain(|r| r.id != id);
    let removed = list.len() != before;

    if list.is_empty() {
        map.remove(event_name);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use crate::{
        assert_or_ok,
        bot::{client::Client, config::BotConfig},
        botvar::BotVar,
    };

    fn setup_client() -> Client {
        Client::new(BotConfig::new("token").with_shard_count(2))
    }

    fn ctx(client: &Client) -> EventContext {
        EventContext::new(client.clone(), 1, "unused")
    }

    #[tokio::test]
    async fn test_add_and_remove_event() {
        let client = setup_client();
        let events = client.events();

        let first = events.add_event("message_create", |_, _| async { Ok(()) }).await;
        let second = events.add_event("message_create", |_, _| async { Ok(()) }).await;
        assert_eq!(events.handlers("message_create").await.len(), 2);
        assert!(events.handlers("ready").await.is_empty());

        // 削除
        {
            assert!(events.remove_event("message_create", first).await);
            assert!(!events.remove_event("message_create", first).await, "二重削除が成功しました。");
            assert!(!events.remove_event("ready", second).await, "別のイベント名から削除できてしまいました。");
            assert_eq!(events.handlers("message_create").await.len(), 1);
        }

        let ids = events.add_event_many(&["guild_create", "guild_update"], |_, _| async { Ok(()) }).await;
        assert_eq!(ids.len(), 2);
        assert_eq!(events.handlers("guild_update").await.len(), 1);
    }

    #[tokio::test]
    async fn test_fire_event_runs_hooks_and_handlers() {
        let client = setup_client();
        let events = client.events();
        let hook_count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        {
            let hook_count = hook_count.clone();
            events
                .add_event_hook(move |_, _| {
                    let hook_count = hook_count.clone();
                    async move {
                        hook_count.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .await;
        }
        {
            let seen = seen.clone();
            events
                .add_event("message_create", move |ctx, payload| {
                    let seen = seen.clone();
                    async move {
                        seen.lock().await.push((ctx.event_name.clone(), ctx.shard_id, payload));
                        Ok(())
                    }
                })
                .await;
        }

        let dispatch = events.fire_event("message_create", ctx(&client), json!({ "content": "hi" })).await;
        assert_eq!(dispatch.len(), 2);
        dispatch.finished().await;

        // ハンドラの無いイベントでもフックは動く
        events.fire_event("typing_start", ctx(&client), Value::Null).await.finished().await;

        assert_eq!(hook_count.load(Ordering::SeqCst), 2, "フックが全てのイベントで呼ばれていません。");
        let seen = seen.lock().await;
        assert_eq!(
            *seen,
            vec![("message_create".to_string(), 1, json!({ "content": "hi" }))],
            "イベント名がfire_eventの名前で上書きされていません。"
        );
    }

    #[tokio::test]
    async fn test_handler_error_is_contained() {
        let client = setup_client();
        let events = client.events();
        let ran = Arc::new(AtomicUsize::new(0));

        events.add_event("ready", |_, _| async { anyhow::bail!("boom") }).await;
        {
            let ran = ran.clone();
            events
                .add_event("ready", move |_, _| {
                    let ran = ran.clone();
                    async move {
                        ran.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .await;
        }

        events.fire_event("ready", ctx(&client), Value::Null).await.finished().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1, "他のハンドラのエラーで処理が止まりました。");
    }

    #[tokio::test]
    async fn test_context_vars_inside_handlers() {
        let client = setup_client();
        let events = client.events();
        let seen = Arc::new(Mutex::new(None));

        {
            let seen = seen.clone();
            events
                .add_event("ready", move |_, _| {
                    let seen = seen.clone();
                    async move {
                        let bot = CURRENT_BOT.get()?;
                        let event = EVENT_CONTEXT.get()?;
                        *seen.lock().await = Some((bot.shard_count(), event.event_name, event.shard_id));
                        Ok(())
                    }
                })
                .await;
        }

        events.fire_event("ready", ctx(&client), Value::Null).await.finished().await;
        assert_eq!(*seen.lock().await, Some((2, "ready".to_string(), 1)));

        // 発火後に呼び出し元へ値が残っていない
        assert!(EVENT_CONTEXT.try_get().is_none());
    }

    #[tokio::test]
    async fn test_temporary_listener_exit() {
        let client = setup_client();
        let events = client.events();
        let calls = Arc::new(AtomicUsize::new(0));

        {
            let calls = calls.clone();
            events
                .add_temporary_listener("message_create", move |_, payload| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        if payload == json!("stop") {
                            return Ok(ListenerControl::Exit);
                        }
                        Ok(ListenerControl::Continue)
                    }
                })
                .await;
        }

        for payload in ["a", "stop", "b"] {
            events.fire_event("message_create", ctx(&client), json!(payload)).await.finished().await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2, "Exit後もリスナーが呼ばれています。");
        assert_eq!(events.temporary_listener_count("message_create").await, 0);
    }

    #[tokio::test]
    async fn test_temporary_listener_error_removes() {
        let client = setup_client();
        let events = client.events();

        events
            .add_temporary_listener("ready", |_, _| async { Err(anyhow::anyhow!("broken listener")) })
            .await;
        events.fire_event("ready", ctx(&client), Value::Null).await.finished().await;
        assert_eq!(events.temporary_listener_count("ready").await, 0, "エラーを返したリスナーが残っています。");

        // 早期削除
        {
            let id = events.add_temporary_listener("ready", |_, _| async { Ok(ListenerControl::Continue) }).await;
            assert!(events.remove_listener_early("ready", id).await);
            assert_eq!(events.temporary_listener_count("ready").await, 0);
        }
    }

    #[tokio::test]
    async fn test_wait_for() {
        let client = setup_client();
        let events = client.events();

        let waiter = {
            let events = events.clone();
            tokio::spawn(async move {
                events.wait_for("message_create", |payload| Ok(payload["author"] == json!(42))).await
            })
        };

        // リスナーの登録を待つ
        while events.temporary_listener_count("message_create").await == 0 {
            tokio::task::yield_now().await;
        }

        events
            .fire_event("message_create", ctx(&client), json!({ "author": 1 }))
            .await
            .finished()
            .await;
        events
            .fire_event("message_create", ctx(&client), json!({ "author": 42, "content": "yes" }))
            .await
            .finished()
            .await;

        let result = waiter.await.unwrap();
        assert_eq!(result, Ok(json!({ "author": 42, "content": "yes" })));
        assert_eq!(events.temporary_listener_count("message_create").await, 0);
    }

    #[tokio::test]
    async fn test_wait_for_predicate_error() {
        let client = setup_client();
        let events = client.events();

        let result = events
            .wait_for_during(
                "ready",
                |_| anyhow::bail!("bad predicate"),
                async {
                    events.fire_event("ready", ctx(&client), Value::Null).await.finished().await;
                },
            )
            .await;

        match result {
            Err(e @ EventError::Predicate(_)) => {
                assert_eq!(e.to_string(), "wait_forの条件でエラーが発生しました: bad predicate");
            }
            other => panic!("条件のエラーが伝わっていません。\nresult: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wait_for_async() {
        let client = setup_client();
        let events = client.events();
        let wanted = BotVar::<u64>::new("wanted_author");
        let token = wanted.set_on(&client, 42).await;

        let waiter = {
            let (events, client, wanted) = (events.clone(), client.clone(), wanted.clone());
            tokio::spawn(async move {
                events
                    .wait_for_async("message_create", move |payload| {
                        let (client, wanted) = (client.clone(), wanted.clone());
                        async move {
                            let author = wanted.get_on(&client).await?;
                            Ok::<_, anyhow::Error>(payload["author"] == json!(author))
                        }
                    })
                    .await
            })
        };

        while events.temporary_listener_count("message_create").await == 0 {
            tokio::task::yield_now().await;
        }

        events
            .fire_event("message_create", ctx(&client), json!({ "author": 1 }))
            .await
            .finished()
            .await;
        assert_eq!(events.temporary_listener_count("message_create").await, 1, "条件に合わないイベントで終了しました。");

        events
            .fire_event("message_create", ctx(&client), json!({ "author": 42 }))
            .await
            .finished()
            .await;

        assert_eq!(waiter.await.unwrap(), Ok(json!({ "author": 42 })));
        assert_eq!(events.temporary_listener_count("message_create").await, 0);
        let _ = wanted.reset_on(&client, token).await;
    }

    #[tokio::test]
    async fn test_dropped_wait_removes_listener() {
        let client = setup_client();
        let events = client.events();

        // タイムアウトで待機ごと捨てる
        {
            for _ in 0..100 {
                let result = tokio::time::timeout(Duration::from_millis(1), events.wait_for_any("ready")).await;
                assert!(result.is_err());
            }
            assert_eq!(
                events.temporary_listener_count("ready").await,
                0,
                "捨てた待機のリスナーが残っています。"
            );
        }

        // 待機中のタスクを止める
        {
            let waiter = {
                let events = events.clone();
                tokio::spawn(async move { events.wait_for_any("typing_start").await })
            };
            while events.temporary_listener_count("typing_start").await == 0 {
                tokio::task::yield_now().await;
            }

            waiter.abort();
            assert!(waiter.await.unwrap_err().is_cancelled());
            assert_eq!(
                events.temporary_listener_count("typing_start").await,
                0,
                "止めたタスクのリスナーが残っています。"
            );
        }
    }

    #[tokio::test]
    async fn test_wait_for_during() {
        let client = setup_client();
        let events = client.events();

        let result = events
            .wait_for_during("member_update", |_| Ok(true), async {
                events.fire_event("member_update", ctx(&client), json!({ "nick": "new" })).await.finished().await;
                "updated"
            })
            .await;
        assert_or_ok!(result, "actionで発火したイベントを受け取れませんでした。");
        assert_eq!(result.unwrap(), ("updated", json!({ "nick": "new" })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_timeout() {
        let client = setup_client();
        let events = client.events();

        let result = events.wait_for_timeout("ready", |_| Ok(true), Duration::from_secs(5)).await;
        assert_eq!(result, Err(EventError::Timeout));
        assert_eq!(
            events.temporary_listener_count("ready").await,
            0,
            "タイムアウトしたリスナーが残っています。"
        );
    }

    #[tokio::test]
    async fn test_remove_hook() {
        let events = EventManager::new();
        let id = events.add_event_hook(|_, _| async {}).await;
        assert!(events.remove_event_hook(id).await);
        assert!(!events.remove_event_hook(id).await);
    }
}
