//! `#[test_timeout::timeout]` and `#[test_timeout::tokio_timeout_test]`.
//!
//! Both expand to a plain `#[test]` that runs the body on a watchdog thread
//! and fails once the limit (seconds, default 60) passes. The async variant
//! drives the body on a current-thread tokio runtime, so tests may use
//! `tokio::time::pause()` when the crate enables tokio's `test-util`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, LitInt};

const DEFAULT_LIMIT_SECS: u64 = 60;

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut function = parse_macro_input!(item as ItemFn);
    let limit = match parse_limit(attr.into()) {
        Ok(limit) => limit,
        Err(err) => return err.to_compile_error().into(),
    };
    if function.sig.asyncness.take().is_none() {
        return syn::Error::new_spanned(
            &function.sig.ident,
            "tokio_timeout_test expects an async fn",
        )
        .to_compile_error()
        .into();
    }

    let body = &function.block;
    let run = quote! {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("build test runtime");
        runtime.block_on(async move {
            if tokio::time::timeout(__limit, async move #body).await.is_err() {
                panic!("test exceeded {:?}", __limit);
            }
        });
    };
    expand(function, limit, run, is_tokio_test)
}

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let function = parse_macro_input!(item as ItemFn);
    let limit = match parse_limit(attr.into()) {
        Ok(limit) => limit,
        Err(err) => return err.to_compile_error().into(),
    };
    if function.sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &function.sig.ident,
            "use tokio_timeout_test for async tests",
        )
        .to_compile_error()
        .into();
    }

    let body = &function.block;
    let run = quote! { #body };
    expand(function, limit, run, is_plain_test)
}

fn parse_limit(attr: TokenStream2) -> syn::Result<u64> {
    if attr.is_empty() {
        return Ok(DEFAULT_LIMIT_SECS);
    }
    let lit: LitInt = syn::parse2(attr)?;
    let secs: u64 = lit.base10_parse()?;
    if secs == 0 {
        return Err(syn::Error::new_spanned(lit, "timeout must be at least one second"));
    }
    Ok(secs)
}

/// Wraps `run` in a `#[test]` whose body waits on a worker thread for at most
/// `limit` seconds. Panics inside the worker are resumed on the test thread
/// so assertion messages survive.
fn expand(
    function: ItemFn,
    limit: u64,
    run: TokenStream2,
    drop_attr: fn(&Attribute) -> bool,
) -> TokenStream {
    let ItemFn {
        attrs, vis, sig, ..
    } = function;
    let attrs = attrs.into_iter().filter(|attr| !drop_attr(attr));

    quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let __limit = std::time::Duration::from_secs(#limit);
            let (__done, __outcome) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| { #run }));
                let _ = __done.send(outcome);
            });
            match __outcome.recv_timeout(__limit) {
                Ok(Ok(_)) => {}
                Ok(Err(panic)) => std::panic::resume_unwind(panic),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test exceeded {:?}", __limit)
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test worker exited without reporting")
                }
            }
        }
    }
    .into()
}

fn path_is(attr: &Attribute, expected: &[&str]) -> bool {
    let segments: Vec<String> = attr
        .path()
        .segments
        .iter()
        .map(|s| s.ident.to_string())
        .collect();
    segments == expected
}

fn is_plain_test(attr: &Attribute) -> bool {
    path_is(attr, &["test"])
}

fn is_tokio_test(attr: &Attribute) -> bool {
    path_is(attr, &["tokio", "test"])
}
