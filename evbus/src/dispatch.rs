//! 投递上下文调度（Dispatcher）
//!
//! 把“调用处理函数”交给绑定指定的执行环境：
//! - `main`：单个专用线程，按到达顺序串行执行（主线程语义）；
//! - `immediate`：直接在投递任务上执行；
//! - `io`：tokio 阻塞任务池；
//! - `computation` / `new_task`：每次投递一个 tokio 任务。
//!
//! 同一订阅的投递任务会等待每次 `dispatch` 完成后再取下一个事件，
//! 因此无论选择哪个上下文，单个订阅内的处理顺序都与投递顺序一致。
//!
use crate::binding::DeliveryContext;
use crate::error::{BusError, BusResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

/// 一次待执行的投递
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// 执行环境
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// 执行一次投递，返回时该投递已执行完毕
    async fn dispatch(&self, job: Job);
}

/// 在调用方任务上直接执行
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineDispatcher;

#[async_trait]
impl Dispatcher for InlineDispatcher {
    async fn dispatch(&self, job: Job) {
        job();
    }
}

/// 在 tokio 阻塞任务池上执行
#[derive(Clone, Copy, Debug, Default)]
pub struct BlockingDispatcher;

#[async_trait]
impl Dispatcher for BlockingDispatcher {
    async fn dispatch(&self, job: Job) {
        if let Err(e) = tokio::task::spawn_blocking(job).await {
            tracing::error!(error = %e, "blocking delivery task failed");
        }
    }
}

/// 每次投递新建一个 tokio 任务
#[derive(Clone, Copy, Debug, Default)]
pub struct SpawnDispatcher;

#[async_trait]
impl Dispatcher for SpawnDispatcher {
    async fn dispatch(&self, job: Job) {
        if let Err(e) = tokio::spawn(async move { job() }).await {
            tracing::error!(error = %e, "spawned delivery task failed");
        }
    }
}

// 任务、投递方所在的运行时、完成通知
type Queued = (Job, Option<Handle>, oneshot::Sender<()>);

/// 单线程串行执行者，首次使用时启动专用线程
///
/// 任务在投递方的 tokio 运行时上下文中执行，处理函数里可以继续
/// `register` 或 `tokio::spawn`。
pub struct SerialDispatcher {
    name: String,
    queue: OnceLock<Option<mpsc::UnboundedSender<Queued>>>,
}

impl SerialDispatcher {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: OnceLock::new(),
        }
    }

    fn queue(&self) -> Option<&mpsc::UnboundedSender<Queued>> {
        self.queue.get_or_init(|| self.start()).as_ref()
    }

    fn start(&self) -> Option<mpsc::UnboundedSender<Queued>> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Queued>();
        let spawned = std::thread::Builder::new()
            .name(format!("evbus-{}", self.name))
            .spawn(move || {
                while let Some((job, runtime, done)) = rx.blocking_recv() {
                    let _entered = runtime.as_ref().map(Handle::enter);
                    job();
                    let _ = done.send(());
                }
            });
        match spawned {
            Ok(_) => {
                tracing::debug!(context = %self.name, "serial delivery thread started");
                Some(tx)
            }
            Err(e) => {
                tracing::error!(
                    context = %self.name,
                    error = %e,
                    "failed to start serial delivery thread, running inline"
                );
                None
            }
        }
    }
}

impl fmt::Debug for SerialDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialDispatcher")
            .field("name", &self.name)
            .field("started", &self.queue.get().is_some())
            .finish()
    }
}

#[async_trait]
impl Dispatcher for SerialDispatcher {
    async fn dispatch(&self, job: Job) {
        let Some(queue) = self.queue() else {
            job();
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        match queue.send((job, Handle::try_current().ok(), done_tx)) {
            Ok(()) => {
                let _ = done_rx.await;
            }
            // 线程已退出：把任务取回来就地执行
            Err(mpsc::error::SendError((job, _, _))) => job(),
        }
    }
}

/// 上下文名称到执行环境的映射
#[derive(Clone)]
pub struct Dispatchers {
    by_context: HashMap<DeliveryContext, Arc<dyn Dispatcher>>,
}

impl Dispatchers {
    /// 不含任何上下文的空映射
    pub fn empty() -> Self {
        Self {
            by_context: HashMap::new(),
        }
    }

    /// 注册或替换某个上下文的执行环境
    pub fn with(
        mut self,
        context: impl Into<DeliveryContext>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        self.by_context.insert(context.into(), dispatcher);
        self
    }

    pub fn resolve(&self, context: &DeliveryContext) -> BusResult<Arc<dyn Dispatcher>> {
        self.by_context
            .get(context)
            .cloned()
            .ok_or_else(|| BusError::UnknownContext {
                context: context.name().to_string(),
            })
    }

    pub fn contains(&self, context: &DeliveryContext) -> bool {
        self.by_context.contains_key(context)
    }

    pub fn contexts(&self) -> Vec<&DeliveryContext> {
        self.by_context.keys().collect()
    }
}

/// 进程内唯一的 `main` 上下文，所有使用默认映射的总线共享
pub fn main_dispatcher() -> Arc<SerialDispatcher> {
    static MAIN: OnceLock<Arc<SerialDispatcher>> = OnceLock::new();
    MAIN.get_or_init(|| Arc::new(SerialDispatcher::new("main")))
        .clone()
}

impl Default for Dispatchers {
    fn default() -> Self {
        Self::empty()
            .with(DeliveryContext::MAIN, main_dispatcher())
            .with(DeliveryContext::IMMEDIATE, Arc::new(InlineDispatcher))
            .with(DeliveryContext::IO, Arc::new(BlockingDispatcher))
            .with(DeliveryContext::COMPUTATION, Arc::new(SpawnDispatcher))
            .with(DeliveryContext::NEW_TASK, Arc::new(SpawnDispatcher))
    }
}

impl fmt::Debug for Dispatchers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.by_context.keys().map(DeliveryContext::name).collect();
        names.sort_unstable();
        f.debug_struct("Dispatchers").field("contexts", &names).finish()
    }
}
