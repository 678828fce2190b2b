//! 订阅绑定（Binding）
//!
//! 一个绑定 = 事件类型 + 处理函数 + 元信息（投递上下文、是否粘性）。
//! 订阅者通过实现 [`Subscriber`] 在 [`BindingTable`] 中显式登记自己的处理函数，
//! 也可以用 `#[subscriber]` / `#[subscribe]` 宏从方法声明生成同样的登记代码。
//!
use crate::event::{AnyEvent, Event, EventType};
use bon::Builder;
use std::any::type_name;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// 投递上下文：处理函数在哪个执行环境上被调用
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeliveryContext(Cow<'static, str>);

impl DeliveryContext {
    /// 指定的“主”上下文：单个串行执行者，按到达顺序执行
    pub const MAIN: Self = Self(Cow::Borrowed("main"));
    /// 直接在投递任务上执行
    pub const IMMEDIATE: Self = Self(Cow::Borrowed("immediate"));
    /// 阻塞型任务池
    pub const IO: Self = Self(Cow::Borrowed("io"));
    /// 计算型任务
    pub const COMPUTATION: Self = Self(Cow::Borrowed("computation"));
    /// 每次投递一个新任务
    pub const NEW_TASK: Self = Self(Cow::Borrowed("new_task"));

    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl Default for DeliveryContext {
    fn default() -> Self {
        Self::MAIN
    }
}

impl fmt::Display for DeliveryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for DeliveryContext {
    fn from(name: &'static str) -> Self {
        Self::named(name)
    }
}

/// 绑定元信息
#[derive(Builder, Clone, Debug, Default, PartialEq, Eq)]
pub struct BindingMeta {
    /// 投递上下文，默认 `main`
    #[builder(default, into)]
    pub context: DeliveryContext,
    /// 是否先回放粘性事件
    #[builder(default)]
    pub sticky: bool,
}

/// 处理函数的返回值：`()` 或 `Result<(), E>`
pub trait HandlerOutput {
    fn into_result(self) -> anyhow::Result<()>;
}

impl HandlerOutput for () {
    fn into_result(self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<E> HandlerOutput for Result<(), E>
where
    E: Into<anyhow::Error>,
{
    fn into_result(self) -> anyhow::Result<()> {
        self.map_err(Into::into)
    }
}

pub(crate) type InvokeFn<S> = Arc<dyn Fn(&S, &AnyEvent) -> anyhow::Result<()> + Send + Sync>;

/// 一条已解析的绑定
pub struct Binding<S> {
    pub(crate) handler: &'static str,
    pub(crate) event_type: EventType,
    pub(crate) meta: BindingMeta,
    pub(crate) invoke: InvokeFn<S>,
}

impl<S> Binding<S> {
    pub fn handler(&self) -> &'static str {
        self.handler
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn meta(&self) -> &BindingMeta {
        &self.meta
    }
}

impl<S> fmt::Debug for Binding<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("handler", &self.handler)
            .field("event_type", &self.event_type)
            .field("meta", &self.meta)
            .finish()
    }
}

/// 被排除的声明（格式不正确的处理函数），只记录不绑定
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejected {
    pub handler: &'static str,
    pub reason: &'static str,
}

/// 绑定表：订阅者在这里登记自己的处理函数
pub struct BindingTable<S> {
    bindings: Vec<Binding<S>>,
    rejected: Vec<Rejected>,
}

impl<S: Send + Sync + 'static> BindingTable<S> {
    pub(crate) fn new() -> Self {
        Self {
            bindings: Vec::new(),
            rejected: Vec::new(),
        }
    }

    /// 以默认元信息（main 上下文、非粘性）登记
    pub fn on<E, O, F>(&mut self, handler: F) -> &mut Self
    where
        E: Event,
        O: HandlerOutput,
        F: Fn(&S, &E) -> O + Send + Sync + 'static,
    {
        self.on_with(BindingMeta::default(), handler)
    }

    /// 登记粘性处理函数：注册时先收到已缓存的粘性事件
    pub fn on_sticky<E, O, F>(&mut self, handler: F) -> &mut Self
    where
        E: Event,
        O: HandlerOutput,
        F: Fn(&S, &E) -> O + Send + Sync + 'static,
    {
        self.on_with(BindingMeta::builder().sticky(true).build(), handler)
    }

    pub fn on_with<E, O, F>(&mut self, meta: BindingMeta, handler: F) -> &mut Self
    where
        E: Event,
        O: HandlerOutput,
        F: Fn(&S, &E) -> O + Send + Sync + 'static,
    {
        let invoke: InvokeFn<S> = Arc::new(move |subscriber, event| {
            match event.downcast_ref::<E>() {
                Some(ev) => handler(subscriber, ev).into_result(),
                // 通道已按类型过滤，不会走到这里
                None => Ok(()),
            }
        });
        self.bindings.push(Binding {
            handler: type_name::<F>(),
            event_type: EventType::of::<E>(),
            meta,
            invoke,
        });
        self
    }

    /// 记录一个格式不正确的声明，它不会被绑定
    pub fn reject(&mut self, handler: &'static str, reason: &'static str) -> &mut Self {
        self.rejected.push(Rejected { handler, reason });
        self
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn bindings(&self) -> &[Binding<S>] {
        &self.bindings
    }

    pub fn rejected(&self) -> &[Rejected] {
        &self.rejected
    }

    pub(crate) fn into_parts(self) -> (Vec<Binding<S>>, Vec<Rejected>) {
        (self.bindings, self.rejected)
    }
}

/// 订阅者：声明自己关心的事件及处理函数
///
/// ```rust
/// use evbus::{BindingMeta, BindingTable, DeliveryContext, Subscriber};
///
/// struct Ping;
/// struct Audit;
///
/// impl Audit {
///     fn on_ping(&self, _ping: &Ping) {}
///     fn on_count(&self, n: &u64) -> anyhow::Result<()> {
///         anyhow::ensure!(*n < 100, "too many");
///         Ok(())
///     }
/// }
///
/// impl Subscriber for Audit {
///     fn bindings(table: &mut BindingTable<Self>) {
///         table.on(Self::on_ping).on_with(
///             BindingMeta::builder()
///                 .context(DeliveryContext::IO)
///                 .sticky(true)
///                 .build(),
///             Self::on_count,
///         );
///     }
/// }
/// ```
pub trait Subscriber: Send + Sync + Sized + 'static {
    fn bindings(table: &mut BindingTable<Self>);
}

/// 收集某订阅者类型的全部绑定（每次注册都重新收集，不缓存）
pub fn collect<S: Subscriber>() -> BindingTable<S> {
    let mut table = BindingTable::new();
    S::bindings(&mut table);
    table
}
