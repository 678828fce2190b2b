//! 订阅注册表（SubscriptionRegistry）
//!
//! 以订阅者身份（共享 `Arc` 的地址）为键，保存该订阅者全部订阅组成的处置组：
//! - `register`：收集绑定 → 为每个绑定打开一条事件流 → 放入处置组 → 启动投递任务；
//!   已注册时为空操作，返回已有的令牌；
//! - `unregister`：移除条目并一次性处置整组订阅；未注册时为空操作；
//! - 处置是协作式的：取消后不再调用处理函数，正在执行的调用不会被打断。
//!
//! 注册表持有订阅者的 `Arc`，因此在注册期间其地址不会被复用。
//!
use crate::binding::{self, Binding, Subscriber};
use crate::dispatch::{Dispatcher, Dispatchers};
use crate::error::BusResult;
use crate::event::{AnyEvent, EventType};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use std::any::{Any, type_name};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// 为绑定打开事件流的一方（通常是总线本身）
pub trait StreamSource {
    /// `sticky` 为真时先回放粘性事件，再跟随实时事件
    fn open(&self, event_type: EventType, sticky: bool) -> BoxStream<'static, AnyEvent>;
}

/// 注册令牌：注册时返回，可用于注销
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionToken {
    identity: usize,
    seq: u64,
}

impl SubscriptionToken {
    /// 本注册表内单调递增的注册序号
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// 查找/注销时指定订阅者的方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriberKey {
    /// 订阅者本身（按身份）
    Identity(usize),
    /// 注册令牌；序号不匹配（已过期）时视为未注册
    Token(SubscriptionToken),
}

impl SubscriberKey {
    fn identity(&self) -> usize {
        match self {
            Self::Identity(id) => *id,
            Self::Token(t) => t.identity,
        }
    }

    fn matches(&self, group: &DisposalGroup) -> bool {
        match self {
            Self::Identity(_) => true,
            Self::Token(t) => group.token == *t,
        }
    }
}

impl<S: ?Sized> From<&Arc<S>> for SubscriberKey {
    fn from(subscriber: &Arc<S>) -> Self {
        Self::Identity(identity_of(subscriber))
    }
}

impl From<SubscriptionToken> for SubscriberKey {
    fn from(token: SubscriptionToken) -> Self {
        Self::Token(token)
    }
}

impl From<&SubscriptionToken> for SubscriberKey {
    fn from(token: &SubscriptionToken) -> Self {
        Self::Token(*token)
    }
}

fn identity_of<S: ?Sized>(subscriber: &Arc<S>) -> usize {
    Arc::as_ptr(subscriber) as *const () as usize
}

/// 处置组中一条订阅的描述
#[derive(Clone, Debug)]
pub struct SubscriptionInfo {
    pub handler: &'static str,
    pub event_type: EventType,
    pub context: String,
    pub sticky: bool,
}

/// 单个订阅者的全部订阅，整体处置
struct DisposalGroup {
    token: SubscriptionToken,
    subscriber: &'static str,
    cancel: CancellationToken,
    subscriptions: Vec<SubscriptionInfo>,
    // 持有订阅者，保证注册期间身份不变
    _owner: Arc<dyn Any + Send + Sync>,
}

impl DisposalGroup {
    fn dispose(&self) {
        self.cancel.cancel();
    }
}

struct Prepared<S> {
    binding: Binding<S>,
    dispatcher: Arc<dyn Dispatcher>,
    events: BoxStream<'static, AnyEvent>,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    groups: DashMap<usize, DisposalGroup>,
    seq: AtomicU64,
    failures: Arc<AtomicU64>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self, key: impl Into<SubscriberKey>) -> bool {
        let key = key.into();
        self.groups
            .get(&key.identity())
            .is_some_and(|g| key.matches(&g))
    }

    /// 注册订阅者，返回注册令牌；重复注册返回已有令牌且不创建新的订阅
    pub fn register<S, Src>(
        &self,
        subscriber: &Arc<S>,
        source: &Src,
        dispatchers: &Dispatchers,
        runtime: &Handle,
    ) -> BusResult<SubscriptionToken>
    where
        S: Subscriber,
        Src: StreamSource + ?Sized,
    {
        let identity = identity_of(subscriber);
        if let Some(group) = self.groups.get(&identity) {
            tracing::debug!(subscriber = type_name::<S>(), "subscriber already registered");
            return Ok(group.token);
        }

        let (bindings, rejected) = binding::collect::<S>().into_parts();
        for r in &rejected {
            tracing::debug!(
                subscriber = type_name::<S>(),
                handler = r.handler,
                reason = r.reason,
                "handler declaration skipped"
            );
        }

        // 先解析全部上下文，任何一个未知都不注册
        let resolved = bindings
            .into_iter()
            .map(|b| dispatchers.resolve(&b.meta.context).map(|d| (b, d)))
            .collect::<BusResult<Vec<_>>>()?;

        let prepared: Vec<Prepared<S>> = resolved
            .into_iter()
            .map(|(binding, dispatcher)| {
                let events = source.open(binding.event_type, binding.meta.sticky);
                Prepared {
                    binding,
                    dispatcher,
                    events,
                }
            })
            .collect();

        let token = SubscriptionToken {
            identity,
            seq: self.seq.fetch_add(1, Ordering::Relaxed) + 1,
        };
        let cancel = CancellationToken::new();
        let subscriptions = prepared
            .iter()
            .map(|p| SubscriptionInfo {
                handler: p.binding.handler,
                event_type: p.binding.event_type,
                context: p.binding.meta.context.name().to_string(),
                sticky: p.binding.meta.sticky,
            })
            .collect();

        match self.groups.entry(identity) {
            Entry::Occupied(existing) => {
                // 并发注册输给了另一方：丢弃已打开的流
                tracing::debug!(subscriber = type_name::<S>(), "subscriber already registered");
                return Ok(existing.get().token);
            }
            Entry::Vacant(slot) => {
                slot.insert(DisposalGroup {
                    token,
                    subscriber: type_name::<S>(),
                    cancel: cancel.clone(),
                    subscriptions,
                    _owner: subscriber.clone(),
                });
            }
        }

        let count = prepared.len();
        for p in prepared {
            runtime.spawn(deliver(
                subscriber.clone(),
                p,
                cancel.child_token(),
                self.failures.clone(),
            ));
        }

        tracing::debug!(
            subscriber = type_name::<S>(),
            bindings = count,
            seq = token.seq,
            "subscriber registered"
        );
        Ok(token)
    }

    /// 注销并处置整组订阅；未注册（或令牌已过期）时返回 `false`
    pub fn unregister(&self, key: impl Into<SubscriberKey>) -> bool {
        let key = key.into();
        let Some((_, group)) = self
            .groups
            .remove_if(&key.identity(), |_, g| key.matches(g))
        else {
            return false;
        };
        group.dispose();
        tracing::debug!(
            subscriber = group.subscriber,
            subscriptions = group.subscriptions.len(),
            "subscriber unregistered"
        );
        true
    }

    /// 处置全部订阅并清空注册表，返回被处置的订阅者数量
    pub fn clear(&self) -> usize {
        let identities: Vec<usize> = self.groups.iter().map(|e| *e.key()).collect();
        let mut disposed = 0;
        for identity in identities {
            if let Some((_, group)) = self.groups.remove(&identity) {
                group.dispose();
                disposed += 1;
            }
        }
        disposed
    }

    pub fn registered_count(&self) -> usize {
        self.groups.len()
    }

    /// 某订阅者当前的订阅描述
    pub fn subscriptions(&self, key: impl Into<SubscriberKey>) -> Option<Vec<SubscriptionInfo>> {
        let key = key.into();
        self.groups
            .get(&key.identity())
            .filter(|g| key.matches(g))
            .map(|g| g.subscriptions.clone())
    }

    /// 某订阅者当前的订阅数量；未注册时为 0
    pub fn binding_count(&self, key: impl Into<SubscriberKey>) -> usize {
        let key = key.into();
        self.groups
            .get(&key.identity())
            .filter(|g| key.matches(g))
            .map_or(0, |g| g.subscriptions.len())
    }

    /// 投递期处理函数失败（返回错误或 panic）的累计次数
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// 单条订阅的投递循环：取事件 → 交给执行环境 → 等待完成 → 下一个
async fn deliver<S: Subscriber>(
    subscriber: Arc<S>,
    prepared: Prepared<S>,
    cancel: CancellationToken,
    failures: Arc<AtomicU64>,
) {
    let Prepared {
        binding,
        dispatcher,
        mut events,
    } = prepared;

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = events.next() => match next {
                Some(event) => event,
                None => break,
            },
        };

        let subscriber = subscriber.clone();
        let invoke = binding.invoke.clone();
        let cancel = cancel.clone();
        let failures = failures.clone();
        let handler = binding.handler;
        let event_type = binding.event_type;

        dispatcher
            .dispatch(Box::new(move || {
                // 处置完成后不再调用处理函数
                if cancel.is_cancelled() {
                    return;
                }
                match catch_unwind(AssertUnwindSafe(|| invoke(&*subscriber, &event))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        failures.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(handler, %event_type, error = %e, "event handler failed");
                    }
                    Err(panic) => {
                        failures.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(
                            handler,
                            %event_type,
                            panic = %panic_message(panic.as_ref()),
                            "event handler panicked"
                        );
                    }
                }
            }))
            .await;
    }

    tracing::trace!(handler = binding.handler, "subscription closed");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
