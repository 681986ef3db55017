//! Submit pipeline behavior against in-memory collaborator fakes: validation
//! short-circuits persistence, fan-out counts, lookup failures, and the
//! offline-recipient scenario.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use courier_server::chat::registry::{Connection, ConnectionRegistry};
use courier_server::chat::service::{
    ChatService, HandleResolver, MessageGateway, PersistedMessage, StoreError, SubmitError,
};
use courier_server::chat::validate::ValidationError;
use courier_server::chat::{Outbound, UserRef};
use tokio::sync::mpsc;

/// Fixed user directory, matching trimmed handles exactly.
struct FakeDirectory {
    users: Vec<UserRef>,
}

impl HandleResolver for FakeDirectory {
    fn resolve_handle(&self, handle: &str) -> Result<Option<UserRef>, StoreError> {
        Ok(self.users.iter().find(|u| u.handle == handle).cloned())
    }
}

/// Records every persist call; optionally fails all of them.
struct FakeGateway {
    persisted: Mutex<Vec<(i64, i64, String)>>,
    next_id: AtomicI64,
    fail: bool,
}

impl FakeGateway {
    fn new() -> Self {
        Self {
            persisted: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    fn persisted(&self) -> Vec<(i64, i64, String)> {
        self.persisted.lock().unwrap().clone()
    }
}

impl MessageGateway for FakeGateway {
    fn persist_message(
        &self,
        sender: i64,
        recipient: i64,
        content: &str,
    ) -> Result<PersistedMessage, StoreError> {
        if self.fail {
            return Err(StoreError::Db("disk full".to_string()));
        }
        self.persisted
            .lock()
            .unwrap()
            .push((sender, recipient, content.to_string()));
        Ok(PersistedMessage {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            created_at: Utc::now(),
        })
    }
}

fn alice() -> UserRef {
    UserRef {
        id: 1,
        handle: "alice".to_string(),
    }
}

fn bob() -> UserRef {
    UserRef {
        id: 2,
        handle: "bob".to_string(),
    }
}

struct Harness {
    service: ChatService,
    gateway: Arc<FakeGateway>,
}

fn harness_with(gateway: FakeGateway) -> Harness {
    let gateway = Arc::new(gateway);
    let service = ChatService::new(
        Arc::new(ConnectionRegistry::new()),
        Arc::new(FakeDirectory {
            users: vec![alice(), bob()],
        }),
        gateway.clone(),
    );
    Harness { service, gateway }
}

fn harness() -> Harness {
    harness_with(FakeGateway::new())
}

/// Open a connection for `user` and return its receiving end.
fn open(service: &ChatService, user: &UserRef) -> (Connection, mpsc::UnboundedReceiver<Outbound>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (service.connection_opened(user, tx), rx)
}

fn drain_deliveries(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<(i64, String)> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        if let Outbound::Delivery(payload) = ev {
            out.push((payload.id, payload.content));
        }
    }
    out
}

#[tokio::test]
async fn empty_content_is_rejected_without_persistence() {
    let h = harness();

    let err = h
        .service
        .submit_message(&alice(), "bob", "   ")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SubmitError::Rejected(ValidationError::EmptyContent)
    ));
    assert!(h.gateway.persisted().is_empty());
}

#[tokio::test]
async fn self_addressed_send_is_rejected() {
    let h = harness();

    let err = h
        .service
        .submit_message(&alice(), " ALICE ", "hi me")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SubmitError::Rejected(ValidationError::SelfAddressed)
    ));
    assert!(h.gateway.persisted().is_empty());
}

#[tokio::test]
async fn unknown_recipient_is_reported_and_nothing_persists() {
    let h = harness();

    let err = h
        .service
        .submit_message(&alice(), "Carol", "hello?")
        .await
        .unwrap_err();

    match err {
        SubmitError::RecipientNotFound(handle) => assert_eq!(handle, "Carol"),
        other => panic!("expected RecipientNotFound, got {:?}", other),
    }
    assert!(h.gateway.persisted().is_empty());
}

#[tokio::test]
async fn storage_failure_aborts_before_any_delivery() {
    let h = harness_with(FakeGateway::failing());
    let (_conn, mut bob_rx) = open(&h.service, &bob());

    let err = h
        .service
        .submit_message(&alice(), "bob", "hi")
        .await
        .unwrap_err();

    assert!(matches!(err, SubmitError::Storage(_)));
    assert!(drain_deliveries(&mut bob_rx).is_empty());
}

#[tokio::test]
async fn fan_out_reaches_all_sender_and_recipient_connections() {
    let h = harness();

    // Sender with two live sessions, recipient with one.
    let (_a1, mut a1_rx) = open(&h.service, &alice());
    let (_a2, mut a2_rx) = open(&h.service, &alice());
    let (_b1, mut b1_rx) = open(&h.service, &bob());

    let receipt = h
        .service
        .submit_message(&alice(), "bob", "hi")
        .await
        .unwrap();

    // Exactly 3 pushes total, identical id and content everywhere.
    for rx in [&mut a1_rx, &mut a2_rx, &mut b1_rx] {
        let deliveries = drain_deliveries(rx);
        assert_eq!(deliveries, vec![(receipt.message_id, "hi".to_string())]);
    }
}

#[tokio::test]
async fn payload_carries_both_parties_and_trimmed_content() {
    let h = harness();
    let (_b1, mut b1_rx) = open(&h.service, &bob());

    h.service
        .submit_message(&alice(), " bob ", "  hello bob  ")
        .await
        .unwrap();

    let mut got = None;
    while let Ok(ev) = b1_rx.try_recv() {
        if let Outbound::Delivery(payload) = ev {
            got = Some(payload);
        }
    }
    let payload = got.expect("delivery expected");
    assert_eq!(payload.content, "hello bob");
    assert_eq!(payload.sender, alice());
    assert_eq!(payload.recipient, bob());
    assert_eq!(h.gateway.persisted(), vec![(1, 2, "hello bob".to_string())]);
}

#[tokio::test]
async fn offline_recipient_still_persists_and_sender_gets_echo() {
    let h = harness();

    let (c1, mut c1_rx) = open(&h.service, &alice());
    let (c2, mut c2_rx) = open(&h.service, &bob());

    // Both online: both connections see the message.
    h.service
        .submit_message(&alice(), "bob", "hello")
        .await
        .unwrap();
    assert_eq!(drain_deliveries(&mut c1_rx).len(), 1);
    assert_eq!(drain_deliveries(&mut c2_rx).len(), 1);

    // Bob disconnects.
    h.service.connection_closed(&c2);

    // Persistence still succeeds; only the sender's echo is delivered.
    h.service
        .submit_message(&alice(), "bob", "are you there?")
        .await
        .unwrap();
    assert_eq!(drain_deliveries(&mut c1_rx).len(), 1);
    assert_eq!(drain_deliveries(&mut c2_rx).len(), 0);

    assert_eq!(
        h.gateway.persisted(),
        vec![
            (1, 2, "hello".to_string()),
            (1, 2, "are you there?".to_string()),
        ]
    );

    h.service.connection_closed(&c1);
}

#[tokio::test]
async fn per_pair_delivery_order_matches_commit_order() {
    let h = harness();
    let (_b1, mut b1_rx) = open(&h.service, &bob());

    for text in ["one", "two", "three"] {
        h.service
            .submit_message(&alice(), "bob", text)
            .await
            .unwrap();
    }

    let contents: Vec<String> = drain_deliveries(&mut b1_rx)
        .into_iter()
        .map(|(_, c)| c)
        .collect();
    assert_eq!(contents, vec!["one", "two", "three"]);
}

#[tokio::test]
async fn self_send_fans_out_once_per_connection() {
    // The validator forbids self-sends, but the router must not double-deliver
    // if one ever reaches it.
    use courier_server::chat::routing::fan_out;
    use courier_server::chat::DeliveryPayload;

    let registry = ConnectionRegistry::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    registry.register(Connection::new(1, tx));

    let payload = DeliveryPayload {
        id: 10,
        content: "note to self".to_string(),
        created_at: Utc::now(),
        sender: alice(),
        recipient: alice(),
    };
    let delivered = fan_out(&registry, &payload);

    assert_eq!(delivered, 1);
    assert_eq!(drain_deliveries(&mut rx).len(), 1);
}

#[tokio::test]
async fn one_closed_connection_does_not_block_the_others() {
    let h = harness();

    let (_a1, a1_rx) = open(&h.service, &alice());
    let (_b1, mut b1_rx) = open(&h.service, &bob());

    // Alice's transport dies without deregistering (the lifecycle manager has
    // not caught up yet). Delivery to Bob must be unaffected and the submit
    // must still succeed.
    drop(a1_rx);

    h.service
        .submit_message(&alice(), "bob", "still works")
        .await
        .unwrap();

    assert_eq!(drain_deliveries(&mut b1_rx).len(), 1);
}
