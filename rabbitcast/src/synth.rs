//! Runtime half of stub synthesis.
//!
//! `#[remote_impl]` already emitted the publish-stub, the renamed handler and the
//! code that boxes and unboxes arguments. What is left for startup is naming,
//! collision checks and binding both halves to the decoded schema, so outbound
//! calls and inbound payloads are validated against the same contract.

use std::any::Any;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::engine::RemoteDeclaration;
use crate::error::{RabbitCastError, Result};
use crate::message::Envelope;
use crate::signature::MethodSignature;
use crate::value::{check_arguments, Value};

/// Suffix appended to an operation name to name its receive handler
pub const RECEIVE_SUFFIX: &str = "_receive";

/// Generated function that unboxes arguments and calls a renamed handler
pub type Invoker = fn(Arc<dyn Any + Send + Sync>, Vec<Value>) -> BoxFuture<'static, Result<()>>;

pub fn handler_name(operation: &str) -> String {
    format!("{operation}{RECEIVE_SUFFIX}")
}

/// Sending half: validates and packs arguments for one operation
#[derive(Debug, Clone)]
pub struct PublishStub {
    pub owner: String,
    pub operation: String,
    pub channel: String,
    pub signature: MethodSignature,
    /// Signature text exactly as declared
    pub encoded: String,
}

impl PublishStub {
    /// Check `args` against the schema and wrap them for the wire
    pub fn pack(&self, args: Vec<Value>) -> Result<Envelope> {
        check_arguments(&self.operation, &self.signature.params, &args)?;
        Ok(Envelope::new(&self.operation, &self.encoded, args))
    }
}

/// Receiving half: the original body under its internal name
#[derive(Debug, Clone)]
pub struct RenamedHandler {
    pub owner: String,
    pub name: String,
    pub operation: String,
    pub signature: MethodSignature,
    pub encoded: String,
    pub is_static: bool,
    invoke: Invoker,
}

impl RenamedHandler {
    /// Validate an inbound envelope against this handler's contract
    pub fn unpack(&self, envelope: Envelope) -> Result<Vec<Value>> {
        if envelope.operation != self.operation {
            return Err(RabbitCastError::schema_mismatch(
                &self.operation,
                format!("message is addressed to '{}'", envelope.operation),
            ));
        }
        if envelope.signature != self.encoded {
            return Err(RabbitCastError::schema_mismatch(
                &self.operation,
                format!(
                    "sender signature {} does not match {}",
                    envelope.signature, self.encoded
                ),
            ));
        }
        check_arguments(&self.operation, &self.signature.params, &envelope.args)?;
        Ok(envelope.args)
    }

    /// Run the original body with positional arguments
    pub async fn invoke(&self, receiver: Arc<dyn Any + Send + Sync>, args: Vec<Value>) -> Result<()> {
        (self.invoke)(receiver, args).await
    }
}

/// The two artifacts produced for one remote operation
#[derive(Debug, Clone)]
pub struct GeneratedPair {
    pub stub: PublishStub,
    pub handler: RenamedHandler,
}

/// Build the stub/handler pair for `declaration` from its decoded signature
pub fn synthesize(declaration: &RemoteDeclaration, signature: MethodSignature) -> Result<GeneratedPair> {
    if !signature.is_void() {
        return Err(RabbitCastError::Ineligible {
            operation: declaration.name.to_string(),
            reason: "remote operations cannot return a value".to_string(),
        });
    }
    let invoke = declaration.invoke.ok_or_else(|| RabbitCastError::Ineligible {
        operation: declaration.name.to_string(),
        reason: "no generated invoker".to_string(),
    })?;

    let name = handler_name(declaration.name);
    if declaration.members.contains(&name.as_str()) {
        return Err(RabbitCastError::NameCollision {
            owner: declaration.owner.to_string(),
            operation: declaration.name.to_string(),
            member: name,
        });
    }

    Ok(GeneratedPair {
        stub: PublishStub {
            owner: declaration.owner.to_string(),
            operation: declaration.name.to_string(),
            channel: declaration.channel.to_string(),
            signature: signature.clone(),
            encoded: declaration.signature.to_string(),
        },
        handler: RenamedHandler {
            owner: declaration.owner.to_string(),
            name,
            operation: declaration.name.to_string(),
            signature,
            encoded: declaration.signature.to_string(),
            is_static: declaration.is_static,
            invoke,
        },
    })
}
