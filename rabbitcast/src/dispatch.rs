use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::exchange::Exchange;
use crate::message::Envelope;
use crate::synth::GeneratedPair;

/// Receive path for one remote operation: decodes, validates and invokes.
///
/// Errors are returned to the registry consumer, which logs them per message.
pub struct OperationExchange {
    pair: Arc<GeneratedPair>,
    receiver: Arc<dyn Any + Send + Sync>,
}

impl OperationExchange {
    pub fn new(pair: Arc<GeneratedPair>, receiver: Arc<dyn Any + Send + Sync>) -> Self {
        Self { pair, receiver }
    }
}

#[async_trait]
impl Exchange for OperationExchange {
    async fn deliver(&self, channel: &str, body: Vec<u8>) -> Result<()> {
        let envelope = Envelope::from_bytes(&body)?;
        let args = self.pair.handler.unpack(envelope)?;
        debug!("Dispatching {} on {}", self.pair.handler.name, channel);
        self.pair.handler.invoke(self.receiver.clone(), args).await
    }

    fn name(&self) -> &str {
        &self.pair.handler.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RemoteDeclaration;
    use crate::error::RabbitCastError;
    use crate::signature::MethodSignature;
    use crate::synth::synthesize;
    use crate::value::{downcast_receiver, Arguments, Primitive, Value};
    use futures_util::future::BoxFuture;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Counter {
        seen: Mutex<Vec<i32>>,
    }

    fn invoke_add(receiver: Arc<dyn Any + Send + Sync>, args: Vec<Value>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            let counter = downcast_receiver::<Counter>("add", receiver)?;
            let mut args = Arguments::new("add", args);
            let n = i32::unboxed(args.next_value()?)?;
            args.finish()?;
            counter.seen.lock().unwrap().push(n);
            Ok(())
        })
    }

    static ADD: RemoteDeclaration = RemoteDeclaration {
        owner: "Counter",
        module: "counter",
        name: "add",
        channel: "add",
        signature: "(I)V",
        is_static: false,
        members: &["add"],
        invoke: Some(invoke_add),
    };

    fn exchange(receiver: Arc<dyn Any + Send + Sync>) -> OperationExchange {
        let pair = synthesize(&ADD, MethodSignature::parse(ADD.signature).unwrap()).unwrap();
        OperationExchange::new(Arc::new(pair), receiver)
    }

    #[tokio::test]
    async fn test_valid_envelope_invokes_handler() {
        let counter = Arc::new(Counter::default());
        let exchange = exchange(counter.clone());
        let body = Envelope::new("add", "(I)V", vec![Value::Int(5)]).to_bytes().unwrap();

        exchange.deliver("add", body).await.unwrap();
        assert_eq!(*counter.seen.lock().unwrap(), vec![5]);
        assert_eq!(exchange.name(), "add_receive");
    }

    #[tokio::test]
    async fn test_invalid_payloads_never_reach_handler() {
        let counter = Arc::new(Counter::default());
        let exchange = exchange(counter.clone());

        assert!(exchange.deliver("add", b"not json".to_vec()).await.is_err());
        let wrong_arity = Envelope::new("add", "(I)V", vec![]).to_bytes().unwrap();
        assert!(exchange.deliver("add", wrong_arity).await.is_err());
        assert!(counter.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_receiver_is_rejected() {
        let exchange = exchange(Arc::new("not a counter"));
        let body = Envelope::new("add", "(I)V", vec![Value::Int(1)]).to_bytes().unwrap();
        let err = exchange.deliver("add", body).await.unwrap_err();
        assert!(matches!(err, RabbitCastError::ReceiverMismatch { .. }));
    }
}
