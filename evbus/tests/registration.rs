use evbus::dispatch::InlineDispatcher;
use evbus::{
    BasicBus, BindingMeta, BindingTable, BusConfig, BusError, DeliveryContext, Dispatchers,
    ReplayBus, Subscriber, subscriber,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
struct Ping {
    id: u32,
}

#[derive(Default)]
struct Listener {
    ids: Mutex<Vec<u32>>,
}

#[subscriber]
impl Listener {
    #[subscribe]
    fn on_ping(&self, ping: &Ping) {
        self.ids.lock().unwrap().push(ping.id);
    }
}

impl Listener {
    fn ids(&self) -> Vec<u32> {
        self.ids.lock().unwrap().clone()
    }
}

async fn wait_until(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition within timeout");
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn only_events_after_registration_are_received() {
    let bus = BasicBus::basic();
    bus.post(Ping { id: 1 });

    let listener = Arc::new(Listener::default());
    bus.register(&listener).unwrap();
    bus.post(Ping { id: 2 });

    wait_until(|| listener.ids() == vec![2]).await;
    settle().await;
    assert_eq!(listener.ids(), vec![2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn registering_twice_is_idempotent() {
    let bus = BasicBus::basic();
    let listener = Arc::new(Listener::default());

    let first = bus.register(&listener).unwrap();
    let second = bus.register(&listener).unwrap();
    assert_eq!(first, second);
    assert_eq!(bus.registry().registered_count(), 1);

    bus.post(Ping { id: 3 });
    wait_until(|| listener.ids() == vec![3]).await;
    settle().await;
    assert_eq!(listener.ids(), vec![3]);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_registration_creates_one_group() {
    let bus = BasicBus::basic();
    let listener = Arc::new(Listener::default());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let bus = bus.clone();
        let listener = listener.clone();
        handles.push(tokio::spawn(async move { bus.register(&listener).unwrap() }));
    }
    let mut tokens = Vec::new();
    for h in handles {
        tokens.push(h.await.unwrap());
    }
    assert!(tokens.windows(2).all(|w| w[0] == w[1]));

    bus.post(Ping { id: 4 });
    wait_until(|| listener.ids() == vec![4]).await;
    settle().await;
    assert_eq!(listener.ids(), vec![4]);
}

#[tokio::test(flavor = "multi_thread")]
async fn unregister_stops_delivery() {
    let bus = BasicBus::basic();
    let listener = Arc::new(Listener::default());
    bus.register(&listener).unwrap();
    assert!(bus.is_registered(&listener));

    bus.post(Ping { id: 1 });
    wait_until(|| listener.ids() == vec![1]).await;

    assert!(bus.unregister(&listener));
    assert!(!bus.is_registered(&listener));
    assert!(!bus.unregister(&listener));

    bus.post(Ping { id: 2 });
    settle().await;
    assert_eq!(listener.ids(), vec![1]);
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_token_does_not_unregister_newer_registration() {
    let bus = BasicBus::basic();
    let listener = Arc::new(Listener::default());

    let old = bus.register(&listener).unwrap();
    assert!(bus.unregister(old));
    let fresh = bus.register(&listener).unwrap();
    assert!(fresh.seq() > old.seq());

    assert!(!bus.unregister(old));
    assert!(bus.is_registered(fresh));
    assert!(bus.unregister(fresh));
}

#[tokio::test(flavor = "multi_thread")]
async fn each_subscriber_receives_event_once() {
    let bus = BasicBus::basic();
    let a = Arc::new(Listener::default());
    let b = Arc::new(Listener::default());
    bus.register(&a).unwrap();
    bus.register(&b).unwrap();

    bus.post(Ping { id: 9 });
    wait_until(|| a.ids() == vec![9] && b.ids() == vec![9]).await;
    settle().await;
    assert_eq!(a.ids(), vec![9]);
    assert_eq!(b.ids(), vec![9]);
}

#[tokio::test(flavor = "multi_thread")]
async fn replay_bus_history_reaches_new_subscriber() {
    let bus = ReplayBus::replay();
    for id in 1..=3 {
        bus.post(Ping { id });
    }
    let listener = Arc::new(Listener::default());
    bus.register(&listener).unwrap();
    wait_until(|| listener.ids() == vec![1, 2, 3]).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_disposes_everything() {
    let bus = BasicBus::basic();
    let a = Arc::new(Listener::default());
    let b = Arc::new(Listener::default());
    bus.register(&a).unwrap();
    bus.register(&b).unwrap();
    bus.post_sticky(Ping { id: 1 });
    wait_until(|| a.ids() == vec![1] && b.ids() == vec![1]).await;

    bus.reset();
    assert_eq!(bus.registry().registered_count(), 0);
    assert!(bus.get_sticky::<Ping>().is_none());

    bus.post(Ping { id: 2 });
    settle().await;
    assert_eq!(a.ids(), vec![1]);
    assert_eq!(b.ids(), vec![1]);

    // reset 之后仍可继续使用
    bus.register(&a).unwrap();
    bus.post(Ping { id: 3 });
    wait_until(|| a.ids() == vec![1, 3]).await;
}

struct Misrouted;

impl Subscriber for Misrouted {
    fn bindings(table: &mut BindingTable<Self>) {
        table.on_with(
            BindingMeta::builder().context("render").build(),
            |_: &Self, _: &Ping| {},
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_context_rejects_registration() {
    let bus = BasicBus::basic();
    let sub = Arc::new(Misrouted);
    let err = bus.register(&sub).unwrap_err();
    assert!(matches!(err, BusError::UnknownContext { ref context } if context == "render"));
    assert!(!bus.is_registered(&sub));

    let cfg = BusConfig::builder()
        .dispatchers(Dispatchers::default().with("render", Arc::new(InlineDispatcher)))
        .build();
    let bus = BasicBus::with_config(cfg);
    assert!(bus.register(&sub).is_ok());
}

#[derive(Default)]
struct Fragile {
    handled: AtomicUsize,
}

impl Subscriber for Fragile {
    fn bindings(table: &mut BindingTable<Self>) {
        table.on(|s: &Self, ping: &Ping| -> anyhow::Result<()> {
            s.handled.fetch_add(1, Ordering::SeqCst);
            match ping.id {
                13 => anyhow::bail!("unlucky"),
                99 => panic!("boom"),
                _ => Ok(()),
            }
        });
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn handler_failures_are_isolated() {
    let bus = BasicBus::basic();
    let fragile = Arc::new(Fragile::default());
    let listener = Arc::new(Listener::default());
    bus.register(&fragile).unwrap();
    bus.register(&listener).unwrap();

    for id in [13, 99, 1] {
        bus.post(Ping { id });
    }

    wait_until(|| fragile.handled.load(Ordering::SeqCst) == 3).await;
    wait_until(|| listener.ids() == vec![13, 99, 1]).await;
    wait_until(|| bus.registry().failure_count() == 2).await;
    assert!(bus.is_registered(&fragile));
}

#[derive(Default)]
struct ThreadProbe {
    threads: Mutex<Vec<Option<String>>>,
}

impl ThreadProbe {
    fn record(&self) {
        let name = std::thread::current().name().map(str::to_string);
        self.threads.lock().unwrap().push(name);
    }

    fn len(&self) -> usize {
        self.threads.lock().unwrap().len()
    }
}

impl Subscriber for ThreadProbe {
    fn bindings(table: &mut BindingTable<Self>) {
        table
            .on(|s: &Self, _: &Ping| s.record())
            .on_with(
                BindingMeta::builder().context(DeliveryContext::IO).build(),
                |s: &Self, _: &u32| s.record(),
            );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn main_context_runs_on_dedicated_thread() {
    let bus = BasicBus::basic();
    let probe = Arc::new(ThreadProbe::default());
    bus.register(&probe).unwrap();

    bus.post(Ping { id: 1 });
    bus.post(Ping { id: 2 });
    wait_until(|| probe.len() == 2).await;

    let threads = probe.threads.lock().unwrap().clone();
    assert!(threads.iter().all(|t| t.as_deref() == Some("evbus-main")));

    bus.post(5_u32);
    wait_until(|| probe.len() == 3).await;
    let io = probe.threads.lock().unwrap()[2].clone();
    assert_ne!(io.as_deref(), Some("evbus-main"));
}

#[tokio::test(flavor = "multi_thread")]
async fn subscriptions_describe_bindings() {
    let bus = BasicBus::basic();
    let probe = Arc::new(ThreadProbe::default());
    let token = bus.register(&probe).unwrap();

    let subs = bus.registry().subscriptions(token).expect("registered");
    assert_eq!(subs.len(), 2);
    let contexts: Vec<&str> = subs.iter().map(|s| s.context.as_str()).collect();
    assert_eq!(contexts, vec!["main", "io"]);
    assert!(subs.iter().all(|s| !s.sticky));

    bus.unregister(token);
    assert!(bus.registry().subscriptions(&probe).is_none());
}

struct Spawner {
    bus: BasicBus,
    child: Arc<Listener>,
    outcome: Mutex<Option<Result<(), String>>>,
}

impl Subscriber for Spawner {
    fn bindings(table: &mut BindingTable<Self>) {
        table.on(|s: &Self, _: &u32| {
            let res = s.bus.register(&s.child).map(|_| ()).map_err(|e| e.to_string());
            *s.outcome.lock().unwrap() = Some(res);
        });
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn main_context_handler_can_register_subscribers() {
    let bus = BasicBus::basic();
    let spawner = Arc::new(Spawner {
        bus: bus.clone(),
        child: Arc::new(Listener::default()),
        outcome: Mutex::new(None),
    });
    bus.register(&spawner).unwrap();

    bus.post(1_u32);
    wait_until(|| spawner.outcome.lock().unwrap().is_some()).await;
    assert_eq!(*spawner.outcome.lock().unwrap(), Some(Ok(())));
    assert!(bus.is_registered(&spawner.child));

    bus.post(Ping { id: 6 });
    wait_until(|| spawner.child.ids() == vec![6]).await;
}

#[test]
fn register_needs_runtime() {
    let bus = BasicBus::basic();
    let err = bus.register(&Arc::new(Listener::default())).unwrap_err();
    assert!(matches!(err, BusError::NoRuntime));
}

#[test]
fn explicit_runtime_allows_registration_outside_async_context() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let bus = BasicBus::with_config(BusConfig::builder().runtime(rt.handle().clone()).build());
    let listener = Arc::new(Listener::default());
    bus.register(&listener).unwrap();

    bus.post(Ping { id: 5 });
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while listener.ids().is_empty() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(listener.ids(), vec![5]);
}
