//! 事件总线（EventBus）
//!
//! 一个泛型总线，按通道保留策略区分三种变体：
//! - [`BasicBus`]：只投递给当前订阅者，无订阅者时丢弃并告警；
//! - [`LatestBus`]：始终持有当前值，新订阅先收到最近一个事件；
//! - [`ReplayBus`]：新订阅先按顺序收到全部历史。
//!
//! 每个总线还带有一份粘性事件缓存和一张订阅注册表。`post` 在事件交给通道后即返回，
//! 处理函数在各自绑定的投递上下文上异步执行。
//!
use crate::binding::Subscriber;
use crate::channel::{Basic, Channel, ChannelStream, Latest, Replay, Retention};
use crate::config::BusConfig;
use crate::error::{BusError, BusResult};
use crate::event::{AnyEvent, Event, EventType, downcast, is_of};
use crate::registry::{StreamSource, SubscriberKey, SubscriptionRegistry, SubscriptionToken};
use crate::sticky::StickyStore;
use futures_core::stream::BoxStream;
use futures_util::{StreamExt, future};
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;

pub type BasicBus = EventBus<Basic>;
pub type LatestBus = EventBus<Latest>;
pub type ReplayBus = EventBus<Replay>;

struct Inner<R: Retention> {
    channel: Channel<R>,
    sticky: StickyStore,
    registry: SubscriptionRegistry,
    config: BusConfig,
}

impl<R: Retention> StreamSource for Inner<R> {
    fn open(&self, event_type: EventType, sticky: bool) -> BoxStream<'static, AnyEvent> {
        if sticky {
            self.sticky.replay_then_follow(event_type, &self.channel)
        } else {
            only(self.channel.subscribe(), event_type)
        }
    }
}

fn only(stream: ChannelStream, ty: EventType) -> BoxStream<'static, AnyEvent> {
    stream
        .filter(move |event| future::ready(is_of(event, ty)))
        .boxed()
}

/// 进程内类型化事件总线，克隆后共享同一份状态
pub struct EventBus<R: Retention = Basic> {
    inner: Arc<Inner<R>>,
}

impl<R: Retention> fmt::Debug for EventBus<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

impl<R: Retention> Clone for EventBus<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Retention> EventBus<R> {
    pub fn with_retention(retention: R, config: BusConfig) -> Self {
        Self::from_channel(Channel::new(retention), config)
    }

    fn from_channel(channel: Channel<R>, config: BusConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                channel,
                sticky: StickyStore::new(),
                registry: SubscriptionRegistry::new(),
                config,
            }),
        }
    }

    /// 投递事件
    pub fn post<T: Event>(&self, event: T) {
        self.post_erased(EventType::of::<T>(), Arc::new(event));
    }

    /// 投递已共享的事件，按 `T` 路由（而不是 `Arc<T>`）
    pub fn post_arc<T: Event>(&self, event: Arc<T>) {
        self.post_erased(EventType::of::<T>(), event);
    }

    fn post_erased(&self, ty: EventType, event: AnyEvent) {
        if R::DROP_UNOBSERVED && !self.inner.channel.has_observers() {
            if self.inner.config.warn_on_drop {
                tracing::warn!(bus = R::NAME, event_type = %ty, "no observers, event discarded");
            }
            return;
        }
        let delivered = self.inner.channel.post(event);
        tracing::trace!(bus = R::NAME, event_type = %ty, observers = delivered, "event posted");
    }

    /// 投递粘性事件：先写入粘性缓存，再正常投递
    pub fn post_sticky<T: Event>(&self, event: T) {
        self.post_sticky_arc(Arc::new(event));
    }

    pub fn post_sticky_arc<T: Event>(&self, event: Arc<T>) {
        let ty = EventType::of::<T>();
        self.inner.sticky.record(ty, event.clone());
        self.post_erased(ty, event);
    }

    /// 某类型粘性事件的快照；没有时返回 `None`
    pub fn get_sticky<T: Event>(&self) -> Option<Vec<Arc<T>>> {
        self.inner.sticky.get::<T>()
    }

    /// 按值移除第一个相等的粘性事件
    pub fn remove_sticky<T: Event + PartialEq>(&self, event: &T) -> bool {
        self.inner.sticky.remove(event)
    }

    /// 按身份移除粘性事件
    pub fn remove_sticky_arc<T: Event>(&self, event: &Arc<T>) -> bool {
        self.inner.sticky.remove_by_identity(event)
    }

    /// 移除某类型的全部粘性事件
    pub fn remove_sticky_type<T: Event>(&self) -> bool {
        self.inner.sticky.remove_type(EventType::of::<T>())
    }

    pub fn clear_sticky(&self) {
        self.inner.sticky.clear();
    }

    /// 某类型的实时事件流（精确类型匹配），每次调用都是一条新订阅
    pub fn of_type<T: Event>(&self) -> BoxStream<'static, Arc<T>> {
        self.inner
            .channel
            .subscribe()
            .filter_map(|event| future::ready(downcast::<T>(event)))
            .boxed()
    }

    /// 不过滤类型的全部事件流
    pub fn of_any(&self) -> ChannelStream {
        self.inner.channel.subscribe()
    }

    /// 先回放粘性事件，再跟随实时事件
    pub fn of_sticky_type<T: Event>(&self) -> BoxStream<'static, Arc<T>> {
        self.inner.sticky.stream_with_replay::<T, R>(&self.inner.channel)
    }

    pub fn has_observers(&self) -> bool {
        self.inner.channel.has_observers()
    }

    /// 注册订阅者，为其每个绑定建立一条订阅；已注册时返回已有令牌
    pub fn register<S: Subscriber>(&self, subscriber: &Arc<S>) -> BusResult<SubscriptionToken> {
        let runtime = match &self.inner.config.runtime {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|_| BusError::NoRuntime)?,
        };
        self.inner.registry.register(
            subscriber,
            self.inner.as_ref(),
            &self.inner.config.dispatchers,
            &runtime,
        )
    }

    /// 注销订阅者（或令牌），处置其全部订阅；未注册时返回 `false`
    pub fn unregister(&self, key: impl Into<SubscriberKey>) -> bool {
        self.inner.registry.unregister(key)
    }

    pub fn is_registered(&self, key: impl Into<SubscriberKey>) -> bool {
        self.inner.registry.is_registered(key)
    }

    /// 处置全部订阅、清空粘性缓存与注册表（同步完成）
    pub fn reset(&self) {
        let disposed = self.inner.registry.clear();
        self.inner.sticky.clear();
        tracing::debug!(bus = R::NAME, subscribers = disposed, "bus reset");
    }

    pub fn retention(&self) -> &R {
        self.inner.channel.retention()
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }
}

impl EventBus<Basic> {
    pub fn basic() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        Self::with_retention(Basic, config)
    }
}

impl EventBus<Latest> {
    pub fn latest() -> Self {
        Self::with_retention(Latest, BusConfig::default())
    }

    /// 以默认值作为初始“当前值”
    pub fn latest_with<T: Event>(default: T, config: BusConfig) -> Self {
        let seed: AnyEvent = Arc::new(default);
        Self::from_channel(Channel::with_history(Latest, vec![seed]), config)
    }
}

impl EventBus<Replay> {
    pub fn replay() -> Self {
        Self::with_retention(Replay::unbounded(), BusConfig::default())
    }

    /// 只回放最近 `limit` 个事件
    pub fn replay_bounded(limit: usize) -> Self {
        Self::with_retention(Replay::bounded(limit), BusConfig::default())
    }
}

impl<R: Retention + Default> Default for EventBus<R> {
    fn default() -> Self {
        Self::with_retention(R::default(), BusConfig::default())
    }
}
