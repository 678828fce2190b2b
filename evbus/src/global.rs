//! 进程级默认总线
//!
//! 推荐由应用自行构造并注入总线实例；确实需要全局实例时：
//! - 启动时调用 `init_*` 安装配置好的实例（只能成功一次）；
//! - 之后通过 `basic()` / `latest()` / `replay()` 取得；未初始化时按默认配置惰性创建；
//! - 关闭时调用实例的 `reset()` 释放全部订阅与粘性事件。
//!
use crate::bus::{BasicBus, EventBus, LatestBus, ReplayBus};
use crate::channel::{Basic, Latest, Replay, Retention};
use crate::config::BusConfig;
use crate::error::{BusError, BusResult};
use std::sync::OnceLock;

static BASIC: OnceLock<BasicBus> = OnceLock::new();
static LATEST: OnceLock<LatestBus> = OnceLock::new();
static REPLAY: OnceLock<ReplayBus> = OnceLock::new();

fn install<R: Retention>(
    slot: &'static OnceLock<EventBus<R>>,
    bus: EventBus<R>,
) -> BusResult<&'static EventBus<R>> {
    slot.set(bus)
        .map_err(|_| BusError::AlreadyInitialized { bus: R::NAME })?;
    tracing::debug!(bus = R::NAME, "global bus installed");
    slot.get().ok_or(BusError::AlreadyInitialized { bus: R::NAME })
}

pub fn init_basic(config: BusConfig) -> BusResult<&'static BasicBus> {
    install(&BASIC, EventBus::with_retention(Basic, config))
}

pub fn init_latest(config: BusConfig) -> BusResult<&'static LatestBus> {
    install(&LATEST, EventBus::with_retention(Latest, config))
}

pub fn init_replay(replay: Replay, config: BusConfig) -> BusResult<&'static ReplayBus> {
    install(&REPLAY, EventBus::with_retention(replay, config))
}

pub fn basic() -> &'static BasicBus {
    BASIC.get_or_init(BasicBus::basic)
}

pub fn latest() -> &'static LatestBus {
    LATEST.get_or_init(LatestBus::latest)
}

pub fn replay() -> &'static ReplayBus {
    REPLAY.get_or_init(ReplayBus::replay)
}
