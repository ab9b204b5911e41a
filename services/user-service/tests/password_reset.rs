//! End-to-end tests for the forgot-password saga over the in-memory
//! broker fabric: user service publishes, notification-side subscriber
//! consumes, both against the same exchange and binding the deployment
//! uses.

use std::sync::Arc;
use std::time::Duration;

use hashtag_broker::{
    BrokerConnection, BrokerEndpoint, MemoryBroker, Publisher, QueueBinding, Subscriber, Topology,
};
use hashtag_events::PasswordResetEvent;
use hashtag_user_service::{MemoryUserStore, PasswordResetSaga, ResetError, User, UserStore};
use tokio::sync::mpsc;
use tokio::time::timeout;

fn existing_user(email: &str) -> User {
    User {
        id: format!("user-{email}"),
        username: "tester".to_string(),
        email: email.to_string(),
        password_hash: "$2b$10$hash".to_string(),
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        age: 36,
        address: None,
        city: None,
        zip: None,
        reset_token: None,
    }
}

fn connection(broker: &Arc<MemoryBroker>) -> Arc<BrokerConnection> {
    Arc::new(BrokerConnection::new(
        BrokerEndpoint::default(),
        Arc::clone(broker),
    ))
}

fn topology() -> Topology {
    Topology::direct(hashtag_events::DEFAULT_EXCHANGE)
}

fn saga(broker: &Arc<MemoryBroker>, store: &Arc<MemoryUserStore>) -> PasswordResetSaga<MemoryUserStore> {
    let publisher = Publisher::new(connection(broker), topology());
    PasswordResetSaga::new(
        Arc::clone(store),
        publisher,
        hashtag_events::PASSWORD_FORGET_ROUTING_KEY,
        "http://localhost:4200",
    )
}

async fn subscribe_events(
    broker: &Arc<MemoryBroker>,
) -> mpsc::UnboundedReceiver<PasswordResetEvent> {
    let subscriber = Subscriber::new(connection(broker), topology());
    let binding = QueueBinding::durable(
        hashtag_events::PASSWORD_RESET_QUEUE,
        hashtag_events::PASSWORD_FORGET_ROUTING_KEY,
    );
    let (tx, rx) = mpsc::unbounded_channel();
    subscriber
        .subscribe(&binding, move |event: PasswordResetEvent| {
            let tx = tx.clone();
            async move {
                tx.send(event).unwrap();
                Ok(())
            }
        })
        .await
        .unwrap();
    rx
}

#[tokio::test]
async fn test_reset_request_reaches_notification_handler() {
    let broker = Arc::new(MemoryBroker::new());
    let store = Arc::new(MemoryUserStore::new());
    store.insert(existing_user("a@example.com"));

    let mut events = subscribe_events(&broker).await;
    let saga = saga(&broker, &store);

    saga.request_password_reset("a@example.com").await.unwrap();

    // The record's token field went from unset to a 40-char hex string.
    let user = store.find_by_email("a@example.com").await.unwrap().unwrap();
    let token = user.reset_token.expect("token should be persisted");
    assert_eq!(token.len(), 40);
    assert!(token.chars().all(|c| c.is_ascii_hexdigit()));

    // The subscriber observes exactly the published payload.
    let event = timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.email, "a@example.com");
    assert_eq!(event.reset_token, token);
    assert_eq!(event.reset_url, format!("http://localhost:4200/reset/{token}"));
}

#[tokio::test]
async fn test_missing_user_publishes_nothing() {
    let broker = Arc::new(MemoryBroker::new());
    let store = Arc::new(MemoryUserStore::new());

    let mut events = subscribe_events(&broker).await;
    let saga = saga(&broker, &store);

    let err = saga
        .request_password_reset("missing@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, ResetError::RecordNotFound(_)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(broker.queue_depth(hashtag_events::PASSWORD_RESET_QUEUE), 0);
    assert_eq!(broker.unacked_count(hashtag_events::PASSWORD_RESET_QUEUE), 0);
}

#[tokio::test]
async fn test_second_request_overwrites_token() {
    let broker = Arc::new(MemoryBroker::new());
    let store = Arc::new(MemoryUserStore::new());
    store.insert(existing_user("a@example.com"));

    let mut events = subscribe_events(&broker).await;
    let saga = saga(&broker, &store);

    saga.request_password_reset("a@example.com").await.unwrap();
    let first = timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();

    saga.request_password_reset("a@example.com").await.unwrap();
    let second = timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();

    assert_ne!(first.reset_token, second.reset_token);

    // Only the latest token is live on the record; the first is
    // invalidated for any consumer that tries to use it.
    let user = store.find_by_email("a@example.com").await.unwrap().unwrap();
    assert_eq!(user.reset_token.as_deref(), Some(second.reset_token.as_str()));
}
