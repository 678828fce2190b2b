use proc_macro::TokenStream;

mod subscriber;

/// 订阅者宏
/// - 作用于固有 `impl` 块，为目标类型实现 `::evbus::Subscriber`
/// - 块内带 `#[subscribe]` 的方法登记为处理函数，签名须为 `fn(&self, &Event)`，
///   返回 `()` 或 `Result<(), E>`
/// - 方法参数：`#[subscribe(sticky, on = "io")]`，默认非粘性、`main` 上下文
/// - 签名不符合要求的方法不会绑定，只记录为被排除的声明
#[proc_macro_attribute]
pub fn subscriber(attr: TokenStream, item: TokenStream) -> TokenStream {
    subscriber::expand(attr, item)
}

/// 处理函数标记，仅在 `#[subscriber]` 的 `impl` 块内有效（由外层宏消费）
#[proc_macro_attribute]
pub fn subscribe(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut out = TokenStream::from(
        syn::Error::new(
            proc_macro2::Span::call_site(),
            "#[subscribe] must be used inside a #[subscriber] impl block",
        )
        .to_compile_error(),
    );
    out.extend(item);
    out
}
