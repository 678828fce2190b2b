//! 多播通道（Channel）
//!
//! 总线底层的广播原语：
//! - 所有投递在同一把锁内串行扇出，并发的 `post` 被线性化；
//! - 每个观察者拥有独立的无界队列，同一事件对每个观察者至多投递一次；
//! - 新订阅在同一把锁内先收到保留的历史，再接收实时事件，中间无缝隙也无重复。
//!
pub mod retention;

pub use retention::{Basic, Latest, Replay, Retention};

use crate::event::AnyEvent;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// 订阅得到的原始事件流（未按类型过滤）
pub type ChannelStream = UnboundedReceiverStream<AnyEvent>;

struct State {
    observers: Vec<mpsc::UnboundedSender<AnyEvent>>,
    history: VecDeque<AnyEvent>,
}

/// 带保留策略的多播通道
pub struct Channel<R: Retention> {
    retention: R,
    state: Mutex<State>,
}

impl<R: Retention> Channel<R> {
    pub fn new(retention: R) -> Self {
        Self::with_history(retention, Vec::new())
    }

    /// 以预置历史创建通道（例如带默认值的 `Latest` 通道）
    pub fn with_history(retention: R, seed: Vec<AnyEvent>) -> Self {
        let mut history = VecDeque::new();
        for event in &seed {
            retention.retain(&mut history, event);
        }
        Self {
            retention,
            state: Mutex::new(State {
                observers: Vec::new(),
                history,
            }),
        }
    }

    pub fn retention(&self) -> &R {
        &self.retention
    }

    /// 扇出事件，返回收到该事件的观察者数量
    pub fn post(&self, event: AnyEvent) -> usize {
        let mut state = self.lock();
        self.retention.retain(&mut state.history, &event);
        state.observers.retain(|tx| tx.send(event.clone()).is_ok());
        state.observers.len()
    }

    /// 订阅全部事件：先收到保留的历史，再收到实时事件
    pub fn subscribe(&self) -> ChannelStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        for event in &state.history {
            // 接收端尚在本函数内，发送不会失败
            let _ = tx.send(event.clone());
        }
        state.observers.push(tx);
        UnboundedReceiverStream::new(rx)
    }

    /// 订阅实时事件，同时取回保留历史的副本（历史不进入返回的流）
    ///
    /// 两者在同一把锁内取得：历史之后的每个事件都只出现在流中。
    pub fn subscribe_split(&self) -> (Vec<AnyEvent>, ChannelStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let retained = state.history.iter().cloned().collect();
        state.observers.push(tx);
        (retained, UnboundedReceiverStream::new(rx))
    }

    /// 是否存在仍在监听的观察者
    pub fn has_observers(&self) -> bool {
        self.observer_count() > 0
    }

    pub fn observer_count(&self) -> usize {
        let mut state = self.lock();
        state.observers.retain(|tx| !tx.is_closed());
        state.observers.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // 临界区内不执行用户代码，中毒后状态仍然一致
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R: Retention + Default> Default for Channel<R> {
    fn default() -> Self {
        Self::new(R::default())
    }
}
