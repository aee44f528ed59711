//! # rabbitcast - broadcast remote operations over RabbitMQ
//!
//! A remote operation is a method with no result that runs on every process
//! listening for it. Calling it publishes its arguments to a fanout exchange;
//! each listener decodes them and runs the original body.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rabbitcast::{ConnectionConfig, Credentials, Scope, Transport};
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
//!
//! #[tokio::main]
//! async fn main() -> rabbitcast::Result<()> {
//!     let config = ConnectionConfig::new(Credentials::from_env()?);
//!     let transport = Transport::initialize(config, &Scope::All).await?;
//!
//!     transport.listen(Arc::new(Chat)).await?;
//!     ChatRemote::new(transport.clone()).notify(42, "hi".into()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Moving parts
//!
//! - [`signature`] decodes the compact parameter encoding, e.g. `(ILjava/lang/String;)V`
//! - [`synth`] and [`engine`] turn declarations emitted by `#[remote_impl]` into
//!   installed stub/handler pairs
//! - [`connection`], [`exchange`], [`publisher`] and [`supervisor`] own the broker
//!   connection, the fanout bindings, publishing and recovery
//! - [`dispatch`] runs handlers for inbound messages
//! - [`transport::Transport`] ties them together

pub mod broker;
pub mod connection;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod message;
pub mod publisher;
pub mod signature;
pub mod supervisor;
pub mod synth;
pub mod transport;
pub mod value;

pub use connection::{ConnectionConfig, ConnectionManager, ConnectionStats, Credentials};
pub use engine::{Engine, RemoteDeclaration, RemoteHost, Scope, TransformReport};
pub use error::{RabbitCastError, Result};
pub use exchange::{Exchange, ExchangeRegistry, FunctionExchange, RebuildReport};
pub use message::Envelope;
pub use signature::{MethodSignature, ParamType, PrimitiveKind, ReturnKind};
pub use synth::{GeneratedPair, Invoker};
pub use transport::Transport;
pub use value::{Arguments, Primitive, Value};

// used by #[remote_impl] output
#[doc(hidden)]
pub use futures_util::future::BoxFuture;
#[doc(hidden)]
pub use inventory;
