use std::collections::HashSet;

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{format_ident, quote};
use syn::spanned::Spanned;
use syn::{parse_macro_input, FnArg, Ident, ImplItem, ImplItemFn, ItemImpl, Pat, Type};

use crate::descriptor::{classify, return_descriptor, Kind, Param};
use crate::remote_method::{is_remote_attr, parse_remote_attr};

const RECEIVE_SUFFIX: &str = "_receive";

/// A #[remote] method as found in the impl block
struct RemoteMethod {
    method: ImplItemFn,
    channel: String,
    is_static: bool,
    /// Stub-side parameter names, in declaration order
    names: Vec<Ident>,
    params: Vec<Param>,
    signature: String,
    /// `false` when the method returns a value
    eligible: bool,
}

impl RemoteMethod {
    fn name(&self) -> &Ident {
        &self.method.sig.ident
    }

    fn handler(&self) -> Ident {
        format_ident!("{}{}", self.name(), RECEIVE_SUFFIX)
    }
}

/// Implementation of #[remote_impl]
pub fn impl_remote_impl(args: TokenStream, input: TokenStream) -> TokenStream {
    if !args.is_empty() {
        return syn::Error::new(Span::call_site(), "#[remote_impl] takes no arguments")
            .to_compile_error()
            .into();
    }
    let input = parse_macro_input!(input as ItemImpl);
    match expand(input) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand(mut input: ItemImpl) -> syn::Result<TokenStream2> {
    if let Some((_, path, _)) = &input.trait_ {
        return Err(syn::Error::new(
            path.span(),
            "#[remote_impl] applies to inherent impl blocks, not trait impls",
        ));
    }
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new(
            input.generics.span(),
            "#[remote_impl] does not support generic impl blocks",
        ));
    }
    let type_ident = match &*input.self_ty {
        Type::Path(type_path) if type_path.qself.is_none() => type_path
            .path
            .segments
            .last()
            .map(|segment| segment.ident.clone())
            .ok_or_else(|| syn::Error::new(input.self_ty.span(), "expected a named type"))?,
        other => {
            return Err(syn::Error::new(
                other.span(),
                "#[remote_impl] can only be applied to impl blocks for named types",
            ))
        }
    };

    let members: Vec<String> = input
        .items
        .iter()
        .filter_map(|item| match item {
            ImplItem::Fn(method) => Some(method.sig.ident.to_string()),
            ImplItem::Const(constant) => Some(constant.ident.to_string()),
            _ => None,
        })
        .collect();

    let mut remotes = Vec::new();
    let mut channels = HashSet::new();
    for item in &mut input.items {
        let ImplItem::Fn(method) = item else {
            continue;
        };
        let Some(position) = method.attrs.iter().position(is_remote_attr) else {
            continue;
        };
        let attr = method.attrs.remove(position);
        if let Some(extra) = method.attrs.iter().find(|attr| is_remote_attr(attr)) {
            return Err(syn::Error::new(extra.span(), "duplicate #[remote] attribute"));
        }

        let remote = analyze(method.clone(), parse_remote_attr(&attr)?.channel)?;
        if remote.eligible {
            if remote.name() == "new" || remote.name() == "transport" {
                return Err(syn::Error::new(
                    remote.name().span(),
                    format!("`{}` is reserved on the generated {}Remote client", remote.name(), type_ident),
                ));
            }
            let handler = remote.handler().to_string();
            if members.contains(&handler) {
                return Err(syn::Error::new(
                    remote.name().span(),
                    format!("cannot generate `{handler}`: a member with that name already exists"),
                ));
            }
            if !channels.insert(remote.channel.clone()) {
                return Err(syn::Error::new(
                    remote.name().span(),
                    format!("channel `{}` is already used by another remote operation", remote.channel),
                ));
            }
            method.sig.ident = remote.handler();
        }
        remotes.push(remote);
    }

    let self_ty = &input.self_ty;
    let owner = type_ident.to_string();
    let remote_ident = format_ident!("{}Remote", type_ident);
    let remote_doc = format!("Publish-stubs for the remote operations of [`{owner}`]");

    let stubs = remotes
        .iter()
        .filter(|remote| remote.eligible)
        .map(generate_stub);
    let declarations = remotes
        .iter()
        .map(|remote| generate_declaration(self_ty, remote, &members));

    Ok(quote! {
        #input

        #[doc = #remote_doc]
        #[derive(Clone, Debug)]
        pub struct #remote_ident {
            transport: ::rabbitcast::Transport,
        }

        impl #remote_ident {
            pub fn new(transport: ::rabbitcast::Transport) -> Self {
                Self { transport }
            }

            pub fn transport(&self) -> &::rabbitcast::Transport {
                &self.transport
            }

            #(#stubs)*
        }

        impl ::rabbitcast::RemoteHost for #self_ty {
            const OWNER: &'static str = ::core::concat!(::core::module_path!(), "::", #owner);
        }

        const _: () = {
            #(#declarations)*
        };
    })
}

fn analyze(method: ImplItemFn, channel: Option<syn::LitStr>) -> syn::Result<RemoteMethod> {
    let sig = &method.sig;
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new(
            sig.generics.span(),
            "remote operations cannot be generic",
        ));
    }

    let mut is_static = true;
    let mut names = Vec::new();
    let mut params = Vec::new();
    for (index, input) in sig.inputs.iter().enumerate() {
        match input {
            FnArg::Receiver(receiver) => {
                if receiver.reference.is_none() || receiver.mutability.is_some() || receiver.colon_token.is_some() {
                    return Err(syn::Error::new(
                        receiver.span(),
                        "remote operations take `&self` or no receiver",
                    ));
                }
                is_static = false;
            }
            FnArg::Typed(pat_type) => {
                let name = match &*pat_type.pat {
                    Pat::Ident(pat_ident) => pat_ident.ident.clone(),
                    _ => format_ident!("arg{}", index),
                };
                names.push(name);
                params.push(classify(&pat_type.ty)?);
            }
        }
    }

    let returns = return_descriptor(&sig.output);
    let eligible = returns.is_none();
    let encoded: String = params.iter().map(Param::descriptor).collect();
    let signature = format!("({}){}", encoded, returns.as_deref().unwrap_or("V"));

    Ok(RemoteMethod {
        channel: channel
            .map(|lit| lit.value())
            .unwrap_or_else(|| sig.ident.to_string()),
        method,
        is_static,
        names,
        params,
        signature,
        eligible,
    })
}

fn generate_stub(remote: &RemoteMethod) -> TokenStream2 {
    let name = remote.name();
    let vis = &remote.method.vis;
    let channel = &remote.channel;
    let names = &remote.names;
    let types = remote.params.iter().map(|param| &param.ty);
    let values = remote
        .names
        .iter()
        .zip(&remote.params)
        .map(|(name, param)| box_value(param, quote!(#name)));
    let doc = format!("Publish `{name}` to every listener on `{channel}`");

    quote! {
        #[doc = #doc]
        #vis async fn #name(&self, #(#names: #types),*) -> ::rabbitcast::Result<()> {
            let values = ::std::vec![#((#values)?),*];
            self.transport.send(#channel, values).await
        }
    }
}

fn generate_declaration(self_ty: &Type, remote: &RemoteMethod, members: &[String]) -> TokenStream2 {
    let name = remote.name().to_string();
    let channel = &remote.channel;
    let signature = &remote.signature;
    let is_static = remote.is_static;

    let (invoker, invoke) = if remote.eligible {
        let invoker = format_ident!("__invoke_{}", remote.name());
        let body = generate_invoker(self_ty, remote);
        (
            quote! {
                fn #invoker(
                    receiver: ::std::sync::Arc<dyn ::std::any::Any + ::core::marker::Send + ::core::marker::Sync>,
                    args: ::std::vec::Vec<::rabbitcast::Value>,
                ) -> ::rabbitcast::BoxFuture<'static, ::rabbitcast::Result<()>> {
                    #body
                }
            },
            quote!(::core::option::Option::Some(#invoker as ::rabbitcast::Invoker)),
        )
    } else {
        (TokenStream2::new(), quote!(::core::option::Option::None))
    };

    quote! {
        #invoker

        ::rabbitcast::inventory::submit! {
            ::rabbitcast::RemoteDeclaration {
                owner: <#self_ty as ::rabbitcast::RemoteHost>::OWNER,
                module: ::core::module_path!(),
                name: #name,
                channel: #channel,
                signature: #signature,
                is_static: #is_static,
                members: &[#(#members),*],
                invoke: #invoke,
            }
        }
    }
}

/// Body of the invoker: unbox positionally, then call the renamed handler
fn generate_invoker(self_ty: &Type, remote: &RemoteMethod) -> TokenStream2 {
    let operation = remote.name().to_string();
    let handler = remote.handler();
    let locals: Vec<_> = (0..remote.params.len())
        .map(|index| format_ident!("__arg{}", index))
        .collect();
    let unpacked = locals.iter().zip(&remote.params).map(|(local, param)| {
        let ty = &param.ty;
        let value = unbox_value(param, quote!(args.next_value()?));
        quote!(let #local: #ty = (#value)?;)
    });
    let asyncness = remote.method.sig.asyncness.map(|_| quote!(.await));

    let call = if remote.is_static {
        quote! {
            let _ = receiver;
            <#self_ty>::#handler(#(#locals),*)#asyncness;
        }
    } else {
        quote! {
            let receiver = ::rabbitcast::value::downcast_receiver::<#self_ty>(#operation, receiver)?;
            receiver.#handler(#(#locals),*)#asyncness;
        }
    };

    quote! {
        ::std::boxed::Box::pin(async move {
            #[allow(unused_mut)]
            let mut args = ::rabbitcast::Arguments::new(#operation, args);
            #(#unpacked)*
            args.finish()?;
            #call
            ::core::result::Result::Ok(())
        })
    }
}

/// Expression of type `rabbitcast::Result<Value>` boxing `expr`
fn box_value(param: &Param, expr: TokenStream2) -> TokenStream2 {
    let ty = &param.ty;
    match &param.kind {
        Kind::Primitive(_) => quote! {
            ::core::result::Result::<_, ::rabbitcast::RabbitCastError>::Ok(
                <#ty as ::rabbitcast::Primitive>::boxed(#expr)
            )
        },
        Kind::Array(element) => {
            let boxed = box_value(element, quote!(item));
            quote! {
                ::std::iter::IntoIterator::into_iter(#expr)
                    .map(|item| #boxed)
                    .collect::<::rabbitcast::Result<::std::vec::Vec<_>>>()
                    .map(::rabbitcast::Value::Array)
            }
        }
        Kind::Reference(_) => quote!(::rabbitcast::Value::reference(&#expr)),
    }
}

/// Expression of type `rabbitcast::Result<T>` unboxing the `Value` expression `expr`
fn unbox_value(param: &Param, expr: TokenStream2) -> TokenStream2 {
    let ty = &param.ty;
    match &param.kind {
        Kind::Primitive(_) => quote!(<#ty as ::rabbitcast::Primitive>::unboxed(#expr)),
        Kind::Array(element) => {
            let unboxed = unbox_value(element, quote!(item));
            quote! {
                ::rabbitcast::Value::into_array(#expr).and_then(|items| {
                    items
                        .into_iter()
                        .map(|item| #unboxed)
                        .collect::<::rabbitcast::Result<#ty>>()
                })
            }
        }
        Kind::Reference(_) => quote!(::rabbitcast::Value::into_reference::<#ty>(#expr)),
    }
}
