use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, spanned::Spanned, Ident, ItemFn, LitStr};

/// Test attribute used across `rxflow`.
///
/// * `#[rxflow_macro::test]` on a sync fn expands to `#[test]`.
/// * `#[rxflow_macro::test]` on an async fn expands to `#[tokio::test]`.
/// * `#[rxflow_macro::test(local)]` / `#[rxflow_macro::test(shared)]` pick the
///   current-thread or multi-thread tokio flavour for async tests.
///
/// Every expanded test installs a `tracing-subscriber` writer first, so the
/// `tracing` events emitted by operators show up in captured test output.
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
  let mut input = parse_macro_input!(item as ItemFn);

  let is_async = input.sig.asyncness.is_some();

  let raw_args = proc_macro2::TokenStream::from(attr);
  let tokio_args = if raw_args.is_empty() {
    proc_macro2::TokenStream::new()
  } else {
    if !is_async {
      return TokenStream::from(
        syn::Error::new(
          raw_args.span(),
          "rxflow_macro::test flavor args are only supported for async tests. Use \
           #[rxflow_macro::test] for sync tests, or make the function async.",
        )
        .to_compile_error(),
      );
    }

    let flavor = if let Ok(ident) = syn::parse2::<Ident>(raw_args.clone()) {
      (ident.to_string(), ident.span())
    } else if let Ok(lit) = syn::parse2::<LitStr>(raw_args.clone()) {
      (lit.value(), lit.span())
    } else {
      return TokenStream::from(
        syn::Error::new(
          raw_args.span(),
          "rxflow_macro::test only accepts: #[rxflow_macro::test], #[rxflow_macro::test(local)], \
           #[rxflow_macro::test(shared)], or string equivalents",
        )
        .to_compile_error(),
      );
    };

    match flavor.0.as_str() {
      "local" => quote!(flavor = "current_thread"),
      "shared" => quote!(flavor = "multi_thread", worker_threads = 4),
      _ => {
        return TokenStream::from(
          syn::Error::new(flavor.1, "rxflow_macro::test only accepts `local` or `shared`")
            .to_compile_error(),
        );
      }
    }
  };

  let body = &input.block;
  let with_logging: syn::Block = syn::parse_quote!({
    let _ = ::tracing_subscriber::fmt()
      .with_test_writer()
      .with_max_level(::tracing::Level::TRACE)
      .try_init();
    #body
  });
  *input.block = with_logging;

  let native_attr = if is_async { quote!(#[tokio::test(#tokio_args)]) } else { quote!(#[test]) };

  let expanded = quote! {
      #native_attr
      #input
  };

  TokenStream::from(expanded)
}
