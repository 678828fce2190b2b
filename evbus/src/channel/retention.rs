//! 通道保留策略（Retention）
//!
//! 三种总线变体只在“新订阅立即收到什么”上不同：
//! - `Basic`：什么都不保留，只投递给投递时已在场的观察者；
//! - `Latest`：保留最近一个事件，新订阅先收到它；
//! - `Replay`：保留全部历史（可选上限），新订阅按顺序先收到全部历史。
//!
use crate::event::AnyEvent;
use std::collections::VecDeque;

/// 保留策略
pub trait Retention: Send + Sync + 'static {
    /// 变体名称（日志与全局实例使用）
    const NAME: &'static str;

    /// 无观察者时是否直接丢弃投递。
    /// 只有不保留任何状态的变体才能这样做，否则后来的订阅者会丢事件。
    const DROP_UNOBSERVED: bool;

    /// 在投递前更新保留的历史
    fn retain(&self, history: &mut VecDeque<AnyEvent>, event: &AnyEvent);
}

/// 普通总线：只投递给当前订阅者
#[derive(Clone, Copy, Debug, Default)]
pub struct Basic;

impl Retention for Basic {
    const NAME: &'static str = "basic";
    const DROP_UNOBSERVED: bool = true;

    fn retain(&self, _history: &mut VecDeque<AnyEvent>, _event: &AnyEvent) {}
}

/// 状态总线：始终持有“当前值”
#[derive(Clone, Copy, Debug, Default)]
pub struct Latest;

impl Retention for Latest {
    const NAME: &'static str = "latest";
    const DROP_UNOBSERVED: bool = false;

    fn retain(&self, history: &mut VecDeque<AnyEvent>, event: &AnyEvent) {
        history.clear();
        history.push_back(event.clone());
    }
}

/// 全历史总线：新订阅按投递顺序收到全部历史
#[derive(Clone, Copy, Debug, Default)]
pub struct Replay {
    limit: Option<usize>,
}

impl Replay {
    /// 不限历史长度
    pub fn unbounded() -> Self {
        Self { limit: None }
    }

    /// 只保留最近 `limit` 个事件（至少 1 个）
    pub fn bounded(limit: usize) -> Self {
        Self {
            limit: Some(limit.max(1)),
        }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }
}

impl Retention for Replay {
    const NAME: &'static str = "replay";
    const DROP_UNOBSERVED: bool = false;

    fn retain(&self, history: &mut VecDeque<AnyEvent>, event: &AnyEvent) {
        history.push_back(event.clone());
        if let Some(limit) = self.limit {
            while history.len() > limit {
                history.pop_front();
            }
        }
    }
}
