use evbus::{BasicBus, BusConfig, LatestBus, ReplayBus, global, subscriber};
use futures_util::StreamExt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq)]
struct Deposited {
    account: String,
    amount: i64,
}

#[derive(Debug, Clone, PartialEq)]
struct Withdrawn {
    account: String,
    amount: i64,
}

/// 粘性事件：最近一次登录的用户
#[derive(Debug, Clone, PartialEq)]
struct SignedIn {
    user: String,
}

#[derive(Default)]
struct Ledger {
    balance: AtomicI64,
}

#[subscriber]
impl Ledger {
    #[subscribe]
    fn on_deposit(&self, ev: &Deposited) {
        let now = self.balance.fetch_add(ev.amount, Ordering::SeqCst) + ev.amount;
        println!("[ledger] {} +{} => {}", ev.account, ev.amount, now);
    }

    #[subscribe(on = "immediate")]
    fn on_withdraw(&self, ev: &Withdrawn) -> anyhow::Result<()> {
        let current = self.balance.load(Ordering::SeqCst);
        anyhow::ensure!(current >= ev.amount, "insufficient funds on {}", ev.account);
        self.balance.fetch_sub(ev.amount, Ordering::SeqCst);
        println!("[ledger] {} -{} => {}", ev.account, ev.amount, current - ev.amount);
        Ok(())
    }
}

#[derive(Default)]
struct Greeter {
    greeted: Mutex<Vec<String>>,
}

#[subscriber]
impl Greeter {
    #[subscribe(sticky, on = "io")]
    fn on_signed_in(&self, ev: &SignedIn) {
        println!("[greeter] welcome back, {}", ev.user);
        self.greeted.lock().unwrap_or_else(|e| e.into_inner()).push(ev.user.clone());
    }
}

async fn pause() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // 普通总线：没有观察者时事件被丢弃
    let bus = global::init_basic(BusConfig::default())?;
    bus.post(Deposited {
        account: "A-1".into(),
        amount: 10,
    });

    let ledger = Arc::new(Ledger::default());
    let token = bus.register(&ledger)?;
    println!("ledger registered (seq {})", token.seq());

    bus.post(Deposited {
        account: "A-1".into(),
        amount: 100,
    });
    bus.post(Withdrawn {
        account: "A-1".into(),
        amount: 30,
    });
    bus.post(Withdrawn {
        account: "A-1".into(),
        amount: 500,
    });
    pause().await;
    println!(
        "balance = {}, handler failures = {}",
        ledger.balance.load(Ordering::SeqCst),
        bus.registry().failure_count()
    );

    // 粘性事件：后注册的粘性绑定先收到缓存的事件
    bus.post_sticky(SignedIn { user: "alice".into() });
    let greeter = Arc::new(Greeter::default());
    bus.register(&greeter)?;
    pause().await;
    println!(
        "greeted {:?}, sticky SignedIn: {:?}",
        greeter.greeted.lock().unwrap_or_else(|e| e.into_inner()),
        bus.get_sticky::<SignedIn>()
    );
    bus.remove_sticky(&SignedIn { user: "alice".into() });

    // 最近值总线：新订阅者先收到当前值
    let status = LatestBus::latest_with("starting".to_string(), BusConfig::default());
    status.post("ready".to_string());
    let mut watch = status.of_type::<String>();
    if let Some(current) = watch.next().await {
        println!("[status] current = {current}");
    }

    // 回放总线：新订阅者先收到全部历史
    let audit = ReplayBus::replay_bounded(2);
    for n in 1..=3_u32 {
        audit.post(n);
    }
    let history: Vec<u32> = audit.of_type::<u32>().take(2).map(|n| *n).collect().await;
    println!("[audit] replayed = {history:?}");

    bus.unregister(&ledger);
    bus.post(Deposited {
        account: "A-1".into(),
        amount: 1,
    });
    pause().await;
    println!("after unregister balance = {}", ledger.balance.load(Ordering::SeqCst));

    bus.reset();
    let scratch = BasicBus::basic();
    println!("fresh bus has observers: {}", scratch.has_observers());
    Ok(())
}
