//! Test attributes that fail a test instead of letting it hang.
//!
//! ```ignore
//! #[test_timeout::timeout(5)]
//! fn decodes() { /* ... */ }
//!
//! #[test_timeout::tokio_timeout_test(10)]
//! async fn routes() { /* ... */ }
//!
//! #[test_timeout::tokio_timeout_test(30, flavor = "multi_thread")]
//! async fn negotiates() { /* ... */ }
//! ```
//!
//! The body runs on a helper thread; the test thread waits at most the
//! configured number of seconds (default 60) for it.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{Attribute, Expr, ExprLit, ItemFn, Lit, Token};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Flavor {
    CurrentThread,
    MultiThread,
}

struct Options {
    secs: u64,
    flavor: Flavor,
}

fn parse_options(attr: TokenStream) -> syn::Result<Options> {
    let mut options = Options {
        secs: DEFAULT_TIMEOUT_SECS,
        flavor: Flavor::CurrentThread,
    };
    let args = Punctuated::<Expr, Token![,]>::parse_terminated.parse(attr)?;
    for arg in args {
        match arg {
            Expr::Lit(ExprLit {
                lit: Lit::Int(lit), ..
            }) => {
                let secs: u64 = lit.base10_parse()?;
                if secs == 0 {
                    return Err(syn::Error::new_spanned(lit, "timeout must be greater than zero"));
                }
                options.secs = secs;
            }
            Expr::Assign(assign) if is_ident(&assign.left, "flavor") => {
                let Expr::Lit(ExprLit {
                    lit: Lit::Str(value),
                    ..
                }) = assign.right.as_ref()
                else {
                    return Err(syn::Error::new_spanned(&assign.right, "flavor must be a string"));
                };
                options.flavor = match value.value().as_str() {
                    "current_thread" => Flavor::CurrentThread,
                    "multi_thread" => Flavor::MultiThread,
                    other => {
                        return Err(syn::Error::new_spanned(
                            value,
                            format!("unknown flavor `{other}`"),
                        ))
                    }
                };
            }
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "expected a timeout in seconds or `flavor = \"...\"`",
                ))
            }
        }
    }
    Ok(options)
}

fn is_ident(expr: &Expr, name: &str) -> bool {
    matches!(expr, Expr::Path(path) if path.path.is_ident(name))
}

/// Drops `#[test]` / `#[tokio::test]` so the generated `#[test]` is the only one.
fn strip_test_attrs(attrs: Vec<Attribute>) -> Vec<Attribute> {
    attrs
        .into_iter()
        .filter(|attr| {
            let segments: Vec<String> = attr
                .path()
                .segments
                .iter()
                .map(|segment| segment.ident.to_string())
                .collect();
            !matches!(
                segments.iter().map(String::as_str).collect::<Vec<_>>().as_slice(),
                ["test"] | ["tokio", "test"]
            )
        })
        .collect()
}

/// `#[test]` wrapper that runs `body` on a helper thread and waits `secs`.
fn guarded_test(func: &ItemFn, secs: u64, body: TokenStream2) -> TokenStream2 {
    let attrs = strip_test_attrs(func.attrs.clone());
    let vis = &func.vis;
    let mut sig = func.sig.clone();
    sig.asyncness = None;

    quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let __limit = ::std::time::Duration::from_secs(#secs);
            let (__done, __outcome) = ::std::sync::mpsc::channel();
            ::std::thread::spawn(move || {
                let __result = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| {
                    #body
                }));
                let _ = __done.send(__result);
            });
            match __outcome.recv_timeout(__limit) {
                Ok(Ok(_)) => {}
                Ok(Err(panic)) => ::std::panic::resume_unwind(panic),
                Err(::std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test timed out after {}s", #secs)
                }
                Err(::std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread exited without reporting a result")
                }
            }
        }
    }
}

/// Async test on a fresh Tokio runtime, bounded by a timeout.
#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let options = match parse_options(attr) {
        Ok(options) => options,
        Err(err) => return err.to_compile_error().into(),
    };
    let func = match syn::parse::<ItemFn>(item) {
        Ok(func) => func,
        Err(err) => return err.to_compile_error().into(),
    };
    if func.sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &func.sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }

    let builder = match options.flavor {
        Flavor::CurrentThread => quote!(::tokio::runtime::Builder::new_current_thread()),
        Flavor::MultiThread => quote!(::tokio::runtime::Builder::new_multi_thread()),
    };
    let block = &func.block;
    let secs = options.secs;
    let body = quote! {
        let runtime = #builder
            .enable_all()
            .build()
            .expect("failed to build Tokio runtime");
        runtime.block_on(async move {
            ::tokio::time::timeout(::std::time::Duration::from_secs(#secs), async move #block)
                .await
                .expect("test timed out");
        });
    };
    guarded_test(&func, secs, body).into()
}

/// Synchronous `#[test]` bounded by a timeout.
#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let options = match parse_options(attr) {
        Ok(options) => options,
        Err(err) => return err.to_compile_error().into(),
    };
    let func = match syn::parse::<ItemFn>(item) {
        Ok(func) => func,
        Err(err) => return err.to_compile_error().into(),
    };
    if func.sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &func.sig.ident,
            "timeout expects a synchronous test function; use tokio_timeout_test",
        )
        .to_compile_error()
        .into();
    }
    let block = &func.block;
    guarded_test(&func, options.secs, quote!(#block)).into()
}
