//! 进程内类型化事件总线（evbus）
//!
//! 让事件的生产者与消费者彼此解耦，不需要相互引用：
//! - 三种投递语义（`bus`）：只投递给当前订阅者 / 最近值回放 / 全历史回放；
//! - 粘性事件缓存（`sticky`）：按类型保存，可查询、可按值/身份/类型移除；
//! - 订阅注册表（`registry`）：按订阅者身份管理其全部绑定，整体注册与处置；
//! - 绑定（`binding`）：显式绑定表或 `#[subscriber]` 宏声明处理函数；
//! - 投递上下文（`dispatch`）：处理函数在 main/io/computation 等执行环境上调用。
//!
//! 典型用法：
//! 1. 构造并持有一个总线（或使用 `global` 中的进程级实例）；
//! 2. 订阅者实现 `Subscriber`（或使用 `#[subscriber]`），调用 `register`；
//! 3. 生产者调用 `post` / `post_sticky`；
//! 4. 不再需要时 `unregister`，进程结束前 `reset`。
//!
//! 日志通过 `tracing` 输出，未安装订阅器时不产生任何输出。
//!
pub mod binding;
pub mod bus;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod global;
pub mod registry;
pub mod sticky;

pub use binding::{BindingMeta, BindingTable, DeliveryContext, HandlerOutput, Subscriber};
pub use bus::{BasicBus, EventBus, LatestBus, ReplayBus};
pub use channel::{Basic, Latest, Replay, Retention};
pub use config::BusConfig;
pub use dispatch::{Dispatcher, Dispatchers, Job};
pub use error::{BusError, BusResult};
pub use event::{AnyEvent, Event, EventType};
pub use registry::{SubscriberKey, SubscriptionToken};

#[cfg(feature = "macros")]
pub use evbus_macros::{subscribe, subscriber};

// 允许在本 crate 内部通过 ::evbus 进行自引用，
// 以便过程宏生成的代码在本 crate 的单元测试中也能解析。
extern crate self as evbus;
