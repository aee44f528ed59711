//! # rabbitcast-macros
//!
//! Compile-time half of rabbitcast: turns marked methods into broadcast remote
//! operations.
//!
//! ```rust,ignore
//! use rabbitcast_macros::remote_impl;
//!
//! pub struct Chat;
//!
//! #[remote_impl]
//! impl Chat {
//!     #[remote]
//!     pub async fn notify(&self, id: i32, text: String) {
//!         println!("{id}: {text}");
//!     }
//! }
//! ```
//!
//! expands to:
//! - `Chat::notify_receive`, the original body under its handler name
//! - `ChatRemote`, a client bound to a `rabbitcast::Transport` whose
//!   `notify(id, text)` publishes to every process listening on `notify`
//! - a `RemoteDeclaration` with signature `(ILString;)V`, collected at link time
//!   and installed by `Transport::transform`
//! - `impl RemoteHost for Chat`, used by `Transport::listen::<Chat>`
//!
//! Parameter types map to signature markers as follows: `i8` `B`, `char` `C`,
//! `f64` `D`, `f32` `F`, `i32` `I`, `i64` `J`, `i16` `S`, `bool` `Z`, `Vec<T>`
//! `[T`, and any other named type `L<path>;`, sent as its serde representation.

extern crate proc_macro;

mod descriptor;
mod remote_impl;
mod remote_method;

use proc_macro::TokenStream;

/// Processes an impl block, generating a publish-stub and a receive handler for
/// every `#[remote]` method in it.
///
/// Remote methods take `&self` or no receiver and owned parameters. Methods that
/// return a value keep their attribute-free body and are reported as skipped by
/// the transformation engine.
#[proc_macro_attribute]
pub fn remote_impl(args: TokenStream, input: TokenStream) -> TokenStream {
    remote_impl::impl_remote_impl(args, input)
}

/// Marks a method as a remote operation, optionally on a named channel.
///
/// ```rust,ignore
/// #[remote]               // channel "notify"
/// fn notify(&self, id: i32) {}
///
/// #[remote("chat.alert")] // channel "chat.alert"
/// fn alert(level: i16) {}
/// ```
#[proc_macro_attribute]
pub fn remote(args: TokenStream, input: TokenStream) -> TokenStream {
    remote_method::impl_remote(args, input)
}
