use evbus::subscriber;

#[derive(Debug)]
struct Ping {
    id: u32,
}

struct Audit;

#[subscriber]
impl Audit {
    #[subscribe]
    fn on_ping(&self, ping: &Ping) {
        let _ = ping.id;
    }

    #[subscribe(sticky, on = "io")]
    fn on_count(&self, n: &u64) -> anyhow::Result<()> {
        anyhow::ensure!(*n < 10, "too many");
        Ok(())
    }

    fn helper(&self) -> u32 {
        1
    }
}

fn main() {
    let table = evbus::binding::collect::<Audit>();
    assert_eq!(table.len(), 2);
    assert_eq!(Audit.helper(), 1);
}
