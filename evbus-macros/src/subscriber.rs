use proc_macro::TokenStream;
use quote::{ToTokens, quote};
use syn::spanned::Spanned;
use syn::{Attribute, FnArg, ImplItem, ImplItemFn, Item, LitStr, Result, Type, parse_macro_input};

/// #[subscriber] 宏实现
/// - 只接受固有 impl 块
/// - 消费块内的 `#[subscribe(...)]` 标记，生成 `Subscriber::bindings`
/// - 签名不合格的方法生成 `table.reject(..)`，不产生编译错误
pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        let attr = proc_macro2::TokenStream::from(attr);
        return syn::Error::new(attr.span(), "#[subscriber] takes no arguments")
            .to_compile_error()
            .into();
    }

    let input = parse_macro_input!(item as Item);
    let mut imp = match input {
        Item::Impl(imp) if imp.trait_.is_none() => imp,
        other => {
            return syn::Error::new(other.span(), "#[subscriber] only on inherent impl block")
                .to_compile_error()
                .into();
        }
    };

    let label = type_label(&imp.self_ty);
    let mut registrations = Vec::new();

    for item in imp.items.iter_mut() {
        let ImplItem::Fn(method) = item else {
            continue;
        };
        let marker = match take_marker(&mut method.attrs) {
            Ok(Some(m)) => m,
            Ok(None) => continue,
            Err(e) => return e.to_compile_error().into(),
        };
        let opts = match SubscribeOptions::from_attr(&marker) {
            Ok(o) => o,
            Err(e) => return e.to_compile_error().into(),
        };

        let name = &method.sig.ident;
        match event_type(method) {
            Ok(event) => {
                let sticky = opts.sticky;
                let context = match &opts.on {
                    Some(lit) => quote!(::evbus::DeliveryContext::named(#lit)),
                    None => quote!(::evbus::DeliveryContext::MAIN),
                };
                registrations.push(quote! {
                    table.on_with::<#event, _, _>(
                        ::evbus::BindingMeta { context: #context, sticky: #sticky },
                        Self::#name,
                    );
                });
            }
            Err(reason) => {
                let handler = LitStr::new(&format!("{label}::{name}"), name.span());
                registrations.push(quote! {
                    table.reject(#handler, #reason);
                });
            }
        }
    }

    if registrations.is_empty() {
        registrations.push(quote! { let _ = table; });
    }

    let self_ty = &imp.self_ty;
    let (impl_generics, _, where_clause) = imp.generics.split_for_impl();
    let expanded = quote! {
        #imp

        impl #impl_generics ::evbus::Subscriber for #self_ty #where_clause {
            fn bindings(table: &mut ::evbus::BindingTable<Self>) {
                #(#registrations)*
            }
        }
    };
    TokenStream::from(expanded)
}

// 取出方法上的 #[subscribe]，重复标记视为错误
fn take_marker(attrs: &mut Vec<Attribute>) -> Result<Option<Attribute>> {
    let mut found: Option<Attribute> = None;
    let mut kept = Vec::with_capacity(attrs.len());
    for attr in attrs.drain(..) {
        if !attr.path().is_ident("subscribe") {
            kept.push(attr);
            continue;
        }
        if found.is_some() {
            return Err(syn::Error::new(attr.span(), "duplicate #[subscribe]"));
        }
        found = Some(attr);
    }
    *attrs = kept;
    Ok(found)
}

// 处理函数签名须为 fn(&self, &Event)；不合格时返回原因
fn event_type(method: &ImplItemFn) -> std::result::Result<Type, &'static str> {
    let sig = &method.sig;
    if sig.asyncness.is_some() {
        return Err("async handlers are not supported");
    }
    if !sig.generics.params.is_empty() {
        return Err("generic handlers are not supported");
    }

    let mut inputs = sig.inputs.iter();
    match inputs.next() {
        Some(FnArg::Receiver(r)) if is_shared_ref(&r.ty) => {}
        _ => return Err("handler must take &self"),
    }

    let params: Vec<&FnArg> = inputs.collect();
    let param = match params.as_slice() {
        [] => return Err("handler takes no event parameter"),
        [p] => p,
        _ => return Err("handler takes more than one event parameter"),
    };

    match param {
        FnArg::Typed(pat) => match &*pat.ty {
            Type::Reference(r) if r.mutability.is_none() => Ok((*r.elem).clone()),
            _ => Err("event parameter must be a shared reference"),
        },
        FnArg::Receiver(_) => Err("handler must take &self"),
    }
}

fn is_shared_ref(ty: &Type) -> bool {
    matches!(ty, Type::Reference(r) if r.mutability.is_none())
}

fn type_label(ty: &Type) -> String {
    ty.to_token_stream().to_string().replace(' ', "")
}

// -------- parsing --------

#[derive(Default)]
struct SubscribeOptions {
    sticky: bool,
    on: Option<LitStr>,
}

impl SubscribeOptions {
    fn from_attr(attr: &Attribute) -> Result<Self> {
        let mut opts = Self::default();
        if matches!(attr.meta, syn::Meta::Path(_)) {
            return Ok(opts);
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("sticky") {
                opts.sticky = true;
                Ok(())
            } else if meta.path.is_ident("on") {
                let lit: LitStr = meta.value()?.parse()?;
                if lit.value().is_empty() {
                    return Err(meta.error("delivery context name must not be empty"));
                }
                opts.on = Some(lit);
                Ok(())
            } else {
                Err(meta.error(
                    "unsupported #[subscribe] argument, expected `sticky` or `on = \"..\"`",
                ))
            }
        })?;
        Ok(opts)
    }
}
