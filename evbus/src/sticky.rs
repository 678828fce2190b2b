//! 粘性事件缓存（StickyStore）
//!
//! 独立于通道自身的回放行为，按事件类型保存投递过的粘性事件：
//! - 同一类型按插入顺序保存，允许重复；
//! - 某类型的序列被清空后，该类型即从缓存中移除，`get` 返回 `None` 而不是空列表；
//! - 所有修改在同一把锁内完成，读取方拿到的是快照，之后的修改不会影响它。
//!
use crate::channel::{Channel, Retention};
use crate::event::{AnyEvent, Event, EventType, downcast, is_of};
use futures_core::stream::BoxStream;
use futures_util::{StreamExt, future, stream};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
pub struct StickyStore {
    events: Mutex<HashMap<EventType, Vec<AnyEvent>>>,
}

impl StickyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个粘性事件
    pub fn record(&self, ty: EventType, event: AnyEvent) {
        self.lock().entry(ty).or_default().push(event);
    }

    /// 某类型粘性事件的快照；从未记录或已被清除时返回 `None`
    pub fn get<T: Event>(&self) -> Option<Vec<Arc<T>>> {
        let snapshot = self.snapshot(EventType::of::<T>())?;
        Some(snapshot.into_iter().filter_map(downcast::<T>).collect())
    }

    /// 按值移除第一个相等的事件
    pub fn remove<T: Event + PartialEq>(&self, event: &T) -> bool {
        self.remove_where(EventType::of::<T>(), |stored| {
            stored.downcast_ref::<T>().is_some_and(|s| s == event)
        })
    }

    /// 按身份（同一个 `Arc`）移除
    pub fn remove_by_identity<T: Event>(&self, event: &Arc<T>) -> bool {
        let target: AnyEvent = event.clone();
        self.remove_where(EventType::of::<T>(), |stored| same_event(stored, &target))
    }

    /// 清除某类型的全部粘性事件
    pub fn remove_type(&self, ty: EventType) -> bool {
        self.lock().remove(&ty).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// 当前保存的粘性事件总数
    pub fn len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 先回放快照，再跟随通道里同类型的实时事件。
    ///
    /// 快照在订阅前取得且随即释放锁，每次调用都会重新取快照。
    pub fn stream_with_replay<T, R>(&self, channel: &Channel<R>) -> BoxStream<'static, Arc<T>>
    where
        T: Event,
        R: Retention,
    {
        self.replay_then_follow(EventType::of::<T>(), channel)
            .filter_map(|event| future::ready(downcast::<T>(event)))
            .boxed()
    }

    /// 类型擦除版本的 [`stream_with_replay`](Self::stream_with_replay)
    ///
    /// 顺序：粘性快照 → 通道保留的历史 → 实时事件。
    /// 通道保留的历史中与快照相同（同一个 `Arc`）的事件会被跳过，
    /// 因此在 Latest/Replay 通道上粘性事件也只投递一次。
    pub fn replay_then_follow<R: Retention>(
        &self,
        ty: EventType,
        channel: &Channel<R>,
    ) -> BoxStream<'static, AnyEvent> {
        let snapshot = self.snapshot(ty).unwrap_or_default();
        let (retained, live) = channel.subscribe_split();
        let retained: Vec<AnyEvent> = retained
            .into_iter()
            .filter(|event| is_of(event, ty))
            .filter(|event| !snapshot.iter().any(|s| same_event(s, event)))
            .collect();
        stream::iter(snapshot)
            .chain(stream::iter(retained))
            .chain(live.filter(move |event| future::ready(is_of(event, ty))))
            .boxed()
    }

    fn snapshot(&self, ty: EventType) -> Option<Vec<AnyEvent>> {
        self.lock().get(&ty).cloned()
    }

    fn remove_where<F>(&self, ty: EventType, matches: F) -> bool
    where
        F: Fn(&AnyEvent) -> bool,
    {
        let mut events = self.lock();
        let Some(list) = events.get_mut(&ty) else {
            return false;
        };
        let Some(pos) = list.iter().position(matches) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            events.remove(&ty);
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EventType, Vec<AnyEvent>>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn same_event(a: &AnyEvent, b: &AnyEvent) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
