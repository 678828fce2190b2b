//! 事件总线统一错误定义
//!
//! 仅包含会返回给调用方的契约错误；投递期的处理器错误、无观察者丢弃、
//! 重复注册/注销等情况在总线内部吸收并记录日志，不会出现在这里。
//!
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BusError {
    /// 注册订阅者需要 tokio 运行时来承载投递任务
    #[error("no tokio runtime available for delivery tasks")]
    NoRuntime,

    /// 绑定声明了未配置的投递上下文
    #[error("unknown delivery context: {context}")]
    UnknownContext { context: String },

    /// 全局默认总线已经初始化
    #[error("global bus already initialized: {bus}")]
    AlreadyInitialized { bus: &'static str },
}

/// 统一 Result 类型别名
pub type BusResult<T> = Result<T, BusError>;
