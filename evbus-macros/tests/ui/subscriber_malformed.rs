use evbus::subscriber;

struct Ping;

struct Loose;

// 签名不合格的方法只会被排除，不产生编译错误
#[subscriber]
impl Loose {
    #[subscribe]
    fn no_event(&self) {}

    #[subscribe]
    fn two_events(&self, _a: &Ping, _b: &Ping) {}

    #[subscribe]
    fn by_value(&self, _a: Ping) {}

    #[subscribe]
    fn no_receiver(_a: &Ping) {}
}

fn main() {
    let table = evbus::binding::collect::<Loose>();
    assert!(table.is_empty());
    assert_eq!(table.rejected().len(), 4);
}
