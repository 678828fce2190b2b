use evbus::subscriber;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Tick;

struct Meter<T> {
    seen: AtomicUsize,
    _tag: PhantomData<fn() -> T>,
}

#[subscriber]
impl<T: 'static> Meter<T> {
    #[subscribe(on = "immediate")]
    fn on_tick(&self, _tick: &Tick) {
        self.seen.fetch_add(1, Ordering::Relaxed);
    }
}

fn main() {
    let table = evbus::binding::collect::<Meter<String>>();
    assert_eq!(table.len(), 1);
}
