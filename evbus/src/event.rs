//! 事件与事件类型（EventType）
//!
//! 任何 `Any + Send + Sync + 'static` 的值都可以作为事件投递，
//! 路由键是其运行时类型（`TypeId`），不做超类型匹配。
//!
use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// 类型擦除后的事件，在通道与粘性缓存中流转
pub type AnyEvent = Arc<dyn Any + Send + Sync>;

/// 事件约束：满足即可投递，无需手动实现
pub trait Event: Any + Send + Sync {}

impl<T: Any + Send + Sync> Event for T {}

/// 事件的运行时类型标识
///
/// 相等性与哈希只看 `TypeId`，`name` 仅用于日志。
#[derive(Clone, Copy)]
pub struct EventType {
    id: TypeId,
    name: &'static str,
}

impl EventType {
    pub fn of<T: Event>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for EventType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EventType {}

impl Hash for EventType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// 事件的具体类型是否为 `ty`（比较的是被擦除的值本身，而不是 `Arc`）
pub(crate) fn is_of(event: &AnyEvent, ty: EventType) -> bool {
    (**event).type_id() == ty.id()
}

/// 将类型擦除的事件还原为具体类型；类型不符时返回 `None`
pub(crate) fn downcast<T: Event>(event: AnyEvent) -> Option<Arc<T>> {
    event.downcast::<T>().ok()
}
