use proc_macro::TokenStream;
use syn::parse::{Parse, ParseStream};
use syn::{Attribute, LitStr};

/// Arguments for the #[remote] attribute
pub struct RemoteArgs {
    pub channel: Option<LitStr>,
}

impl Parse for RemoteArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        if input.is_empty() {
            return Ok(RemoteArgs { channel: None });
        }

        let channel: LitStr = input.parse()?;
        if channel.value().is_empty() {
            return Err(syn::Error::new(channel.span(), "channel name cannot be empty"));
        }
        Ok(RemoteArgs {
            channel: Some(channel),
        })
    }
}

pub fn is_remote_attr(attr: &Attribute) -> bool {
    attr.path()
        .segments
        .last()
        .is_some_and(|segment| segment.ident == "remote")
}

/// Parse the channel override of a #[remote] attribute
pub fn parse_remote_attr(attr: &Attribute) -> syn::Result<RemoteArgs> {
    match &attr.meta {
        syn::Meta::Path(_) => Ok(RemoteArgs { channel: None }),
        _ => attr.parse_args(),
    }
}

/// #[remote] only means something inside #[remote_impl], which strips it
pub fn impl_remote(_args: TokenStream, input: TokenStream) -> TokenStream {
    let item = proc_macro2::TokenStream::from(input);
    let error = syn::Error::new(
        proc_macro2::Span::call_site(),
        "#[remote] must be used on a method inside a #[remote_impl] block",
    )
    .to_compile_error();

    TokenStream::from(quote::quote! {
        #error
        #item
    })
}
