//! Procedural macros used by `handview`.
//!
//! Do not use this crate directly, use `handview` instead.

use proc_macro::{Span, TokenStream};
use quote::quote;
use syn::{parse::Error, ItemFn};

/// Turns `fn main()` into a handview application entry point.
///
/// The annotated function runs on a background thread after logging has been initialized, while
/// the main thread drives the window event loop. The process exits once the function returns.
#[proc_macro_attribute]
pub fn main(args: TokenStream, item: TokenStream) -> TokenStream {
    match expand_main(args, item.clone()) {
        Ok(tokens) => tokens,
        Err(err) => {
            // Keep the original item around so IDEs can still analyze it.
            let mut error = item;
            error.extend(TokenStream::from(err.to_compile_error()));
            error
        }
    }
}

fn expand_main(args: TokenStream, item: TokenStream) -> syn::Result<TokenStream> {
    if !args.is_empty() {
        return Err(Error::new(
            Span::call_site().into(),
            "`#[handview::main]` does not accept arguments",
        ));
    }

    let item = syn::parse::<ItemFn>(item)?;

    if item.sig.ident != "main" {
        return Err(Error::new(
            item.sig.ident.span(),
            "`#[handview::main]` must be applied to a function called `main`",
        ));
    }
    if let Some(asyncness) = &item.sig.asyncness {
        return Err(Error::new(
            asyncness.span,
            "`#[handview::main]` cannot be applied to an `async fn`",
        ));
    }
    if !item.sig.inputs.is_empty() {
        return Err(Error::new(
            item.sig.ident.span(),
            "`main` must not take any arguments",
        ));
    }

    Ok(quote! {
        fn main() {
            #item

            ::handview::init_logger!();

            ::handview::run(main);
        }
    }
    .into())
}
