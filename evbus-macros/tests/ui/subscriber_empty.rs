use evbus::subscriber;

struct Idle;

#[subscriber]
impl Idle {}

fn main() {
    assert!(evbus::binding::collect::<Idle>().is_empty());
}
