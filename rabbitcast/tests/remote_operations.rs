use std::sync::{Arc, Mutex};
use std::time::Duration;

use rabbitcast::broker::memory::MemoryBroker;
use rabbitcast::{
    ConnectionConfig, Envelope, FunctionExchange, ParamType, PrimitiveKind, RabbitCastError, RemoteHost, Scope,
    Transport, Value,
};
use rabbitcast_macros::remote_impl;
use tokio::sync::mpsc;
use tokio::time::timeout;

mod java {
    pub mod lang {
        pub type String = std::string::String;
    }
}

pub struct Inbox {
    received: mpsc::UnboundedSender<(i32, String)>,
}

#[remote_impl]
impl Inbox {
    #[remote]
    pub async fn notify(&self, id: i32, text: java::lang::String) {
        let _ = self.received.send((id, text));
    }

    #[remote]
    pub fn unread(&self) -> i64 {
        0
    }
}

static AUDITS: Mutex<Vec<(i16, Vec<String>)>> = Mutex::new(Vec::new());

pub struct Auditor;

#[remote_impl]
impl Auditor {
    #[remote("audit.log")]
    fn audit(level: i16, tags: Vec<String>) {
        AUDITS.lock().unwrap().push((level, tags));
    }
}

pub struct Gauge {
    readings: mpsc::UnboundedSender<(f64, f32)>,
}

#[remote_impl]
impl Gauge {
    #[remote("gauge.reading")]
    pub fn reading(&self, value: f64, ratio: f32) {
        let _ = self.readings.send((value, ratio));
    }
}

const WAIT: Duration = Duration::from_secs(2);

fn scope() -> Scope {
    Scope::Module(module_path!().to_string())
}

async fn transport(broker: &MemoryBroker) -> Transport {
    let transport = Transport::new(ConnectionConfig::default(), Arc::new(broker.clone()));
    let report = transport.transform(&scope()).await;
    assert!(report.is_clean(), "transform failed: {:?}", report.failures);
    transport
}

async fn listening_inbox(transport: &Transport) -> mpsc::UnboundedReceiver<(i32, String)> {
    let (tx, rx) = mpsc::unbounded_channel();
    transport.listen(Arc::new(Inbox { received: tx })).await.unwrap();
    rx
}

#[tokio::test]
async fn notify_is_decoded_and_delivered() {
    let broker = MemoryBroker::new();
    let transport = transport(&broker).await;

    let pair = transport.engine().installed("notify").await.unwrap();
    assert_eq!(pair.handler.name, "notify_receive");
    assert_eq!(pair.handler.encoded, "(ILjava/lang/String;)V");
    assert_eq!(pair.handler.owner, Inbox::OWNER);
    assert_eq!(
        pair.stub.signature.params,
        vec![
            ParamType::Primitive(PrimitiveKind::Int),
            ParamType::reference("java::lang::String")
        ]
    );

    let mut inbox = listening_inbox(&transport).await;
    InboxRemote::new(transport.clone()).notify(42, "hi".to_string()).await.unwrap();

    let received = timeout(WAIT, inbox.recv()).await.unwrap().unwrap();
    assert_eq!(received, (42, "hi".to_string()));
}

#[tokio::test]
async fn transform_is_idempotent() {
    let broker = MemoryBroker::new();
    let transport = transport(&broker).await;
    let channels = transport.engine().channels().await;
    assert_eq!(channels, vec!["audit.log", "gauge.reading", "notify"]);

    let again = transport.transform(&scope()).await;
    assert!(again.transformed.is_empty());
    assert!(again.skipped_frozen.contains(&Inbox::OWNER.to_string()));
    assert_eq!(transport.engine().channels().await, channels);
}

#[tokio::test]
async fn value_returning_operations_are_skipped() {
    let broker = MemoryBroker::new();
    let transport = Transport::new(ConnectionConfig::default(), Arc::new(broker.clone()));
    let report = transport.transform(&scope()).await;

    assert_eq!(report.skipped_non_void, vec![format!("{}::unread", Inbox::OWNER)]);
    assert!(transport.engine().installed("unread").await.is_none());
    // the method itself is untouched
    let (tx, _rx) = mpsc::unbounded_channel();
    assert_eq!(Inbox { received: tx }.unread(), 0);
}

#[tokio::test]
async fn every_listener_receives_a_broadcast() {
    let broker = MemoryBroker::new();
    let first = transport(&broker).await;
    let second = transport(&broker).await;
    let sender = transport(&broker).await;

    let mut first_inbox = listening_inbox(&first).await;
    let mut second_inbox = listening_inbox(&second).await;
    assert_eq!(broker.bound_queues("notify"), 2);

    InboxRemote::new(sender).notify(7, "all hands".to_string()).await.unwrap();

    for inbox in [&mut first_inbox, &mut second_inbox] {
        let received = timeout(WAIT, inbox.recv()).await.unwrap().unwrap();
        assert_eq!(received, (7, "all hands".to_string()));
    }
}

#[tokio::test]
async fn static_operations_use_their_channel_override() {
    let broker = MemoryBroker::new();
    let transport = transport(&broker).await;
    assert_eq!(transport.listen_static::<Auditor>().await.unwrap(), vec!["audit.log"]);

    let tags = vec!["login".to_string(), "admin".to_string()];
    AuditorRemote::new(transport.clone()).audit(3, tags.clone()).await.unwrap();

    timeout(WAIT, async {
        while !AUDITS.lock().unwrap().contains(&(3, tags.clone())) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn mismatched_messages_are_dropped_without_stopping_the_consumer() {
    let broker = MemoryBroker::new();
    let transport = transport(&broker).await;
    let mut inbox = listening_inbox(&transport).await;

    let stale = Envelope::new(
        "notify",
        "(JLjava/lang/String;)V",
        vec![Value::Long(1), Value::reference("old").unwrap()],
    );
    transport.publish("notify", &stale.to_bytes().unwrap()).await.unwrap();
    transport.publish("notify", b"garbage").await.unwrap();
    InboxRemote::new(transport.clone()).notify(2, "new".to_string()).await.unwrap();

    let received = timeout(WAIT, inbox.recv()).await.unwrap().unwrap();
    assert_eq!(received, (2, "new".to_string()));
}

#[tokio::test]
async fn duplicate_registration_is_an_error() {
    let broker = MemoryBroker::new();
    let transport = transport(&broker).await;
    let _inbox = listening_inbox(&transport).await;

    let (tx, _rx) = mpsc::unbounded_channel();
    let err = transport.listen(Arc::new(Inbox { received: tx })).await.unwrap_err();
    assert!(matches!(err, RabbitCastError::AlreadyRegistered { .. }));
    assert_eq!(broker.bound_queues("notify"), 1);

    assert_eq!(transport.unlisten::<Inbox>().await, 1);
    assert_eq!(broker.bound_queues("notify"), 0);
    let _inbox = listening_inbox(&transport).await;
}

#[tokio::test]
async fn every_name_is_rebound_after_a_connection_failure() {
    let broker = MemoryBroker::new();
    let transport = transport(&broker).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let names: Vec<String> = (0..5).map(|i| format!("topic-{i}")).collect();

    for name in &names {
        let tx = tx.clone();
        let handler = FunctionExchange::new(name.clone(), move |channel, _body| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(channel);
                Ok(())
            }
        });
        transport.register(name, Arc::new(handler)).await.unwrap();
    }

    broker.sever();
    assert!(!transport.is_connected().await);

    for name in &names {
        transport.publish(name, b"ping").await.unwrap();
        let channel = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(&channel, name);
    }
    for name in &names {
        assert!(transport.is_bound(name).await);
        assert_eq!(broker.bound_queues(name), 1);
    }
    assert_eq!(transport.stats().await.reconnects, 1);
}

#[tokio::test]
async fn send_while_down_reconnects_once_and_completes() {
    let broker = MemoryBroker::new();
    let transport = transport(&broker).await;
    let mut inbox = listening_inbox(&transport).await;
    let attempts = broker.connect_attempts();

    broker.sever();
    InboxRemote::new(transport.clone()).notify(9, "back".to_string()).await.unwrap();

    assert_eq!(broker.connect_attempts(), attempts + 1);
    let received = timeout(WAIT, inbox.recv()).await.unwrap().unwrap();
    assert_eq!(received, (9, "back".to_string()));
}

#[tokio::test]
async fn send_fails_instead_of_hanging_when_reconnect_fails() {
    let broker = MemoryBroker::new();
    let transport = transport(&broker).await;
    let _inbox = listening_inbox(&transport).await;
    let attempts = broker.connect_attempts();

    broker.sever();
    broker.set_reachable(false);
    let result = timeout(WAIT, InboxRemote::new(transport.clone()).notify(1, "lost".to_string()))
        .await
        .expect("send must not hang");

    match result {
        Err(RabbitCastError::Send { exchange, .. }) => assert_eq!(exchange, "notify"),
        other => panic!("expected a send failure, got {other:?}"),
    }
    assert_eq!(broker.connect_attempts(), attempts + 1);
    assert!(transport.registered().await.contains(&"notify".to_string()));
}

#[tokio::test]
async fn non_finite_floats_reach_the_listener() {
    let broker = MemoryBroker::new();
    let transport = transport(&broker).await;
    let (tx, mut readings) = mpsc::unbounded_channel();
    transport.listen(Arc::new(Gauge { readings: tx })).await.unwrap();

    let gauge = GaugeRemote::new(transport.clone());
    gauge.reading(f64::NAN, f32::INFINITY).await.unwrap();
    gauge.reading(f64::NEG_INFINITY, 0.5).await.unwrap();

    let mut received = Vec::new();
    for _ in 0..2 {
        received.push(timeout(WAIT, readings.recv()).await.unwrap().unwrap());
    }
    assert!(received.iter().any(|(value, ratio)| value.is_nan() && *ratio == f32::INFINITY));
    assert!(received.contains(&(f64::NEG_INFINITY, 0.5)));
}
