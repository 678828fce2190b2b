//! 总线配置（BusConfig）
//!
use crate::dispatch::Dispatchers;
use bon::Builder;
use tokio::runtime::Handle;

/// 总线配置
#[derive(Builder, Clone, Debug)]
pub struct BusConfig {
    /// 普通总线在无观察者时丢弃事件，是否记录告警
    #[builder(default = true)]
    pub warn_on_drop: bool,
    /// 投递上下文映射，默认包含 main/immediate/io/computation/new_task；
    /// 默认的 `main` 为进程内共享的同一个串行线程
    #[builder(default)]
    pub dispatchers: Dispatchers,
    /// 承载投递任务的运行时；为空时使用注册时所在的运行时
    pub runtime: Option<Handle>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
