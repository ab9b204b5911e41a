//! Listener tests against the in-memory broker fabric, publishing through
//! the user service's saga so the wire format is the real one.

use std::sync::Arc;
use std::time::Duration;

use hashtag_broker::{
    BrokerConnection, BrokerEndpoint, MemoryBroker, Publisher, QueueBinding, Topology,
};
use hashtag_events::PasswordResetEvent;
use hashtag_notification_service::PasswordResetListener;
use hashtag_user_service::{MemoryUserStore, PasswordResetSaga, User};
use tokio::sync::mpsc;
use tokio::time::timeout;

fn connection(broker: &Arc<MemoryBroker>) -> Arc<BrokerConnection> {
    Arc::new(BrokerConnection::new(
        BrokerEndpoint::default(),
        Arc::clone(broker),
    ))
}

fn topology() -> Topology {
    Topology::direct(hashtag_events::DEFAULT_EXCHANGE)
}

fn binding() -> QueueBinding {
    QueueBinding::durable(
        hashtag_events::PASSWORD_RESET_QUEUE,
        hashtag_events::PASSWORD_FORGET_ROUTING_KEY,
    )
}

#[tokio::test]
async fn test_listener_receives_saga_event() {
    let broker = Arc::new(MemoryBroker::new());

    let listener = PasswordResetListener::new(connection(&broker), topology(), binding());
    let (tx, mut rx) = mpsc::unbounded_channel();
    listener
        .start(move |event: PasswordResetEvent| {
            let tx = tx.clone();
            async move {
                tx.send(event).unwrap();
                Ok(())
            }
        })
        .await
        .unwrap();

    let store = Arc::new(MemoryUserStore::new());
    store.insert(User {
        id: "user-1".to_string(),
        username: "ada".to_string(),
        email: "ada@example.com".to_string(),
        password_hash: "$2b$10$hash".to_string(),
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        age: 36,
        address: None,
        city: None,
        zip: None,
        reset_token: None,
    });
    let saga = PasswordResetSaga::new(
        store,
        Publisher::new(connection(&broker), topology()),
        hashtag_events::PASSWORD_FORGET_ROUTING_KEY,
        "http://localhost:4200",
    );

    saga.request_password_reset("ada@example.com").await.unwrap();

    let event = timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.email, "ada@example.com");
    assert!(event
        .reset_url
        .ends_with(&format!("/reset/{}", event.reset_token)));
}

#[tokio::test]
async fn test_listener_survives_handler_failure() {
    let broker = Arc::new(MemoryBroker::new());

    let listener = PasswordResetListener::new(connection(&broker), topology(), binding());
    listener
        .start(|_: PasswordResetEvent| async { Err("smtp down".into()) })
        .await
        .unwrap();

    let publisher = Publisher::new(connection(&broker), topology());
    publisher
        .publish_json(
            hashtag_events::PASSWORD_FORGET_ROUTING_KEY,
            &PasswordResetEvent {
                email: "ada@example.com".to_string(),
                reset_token: "ab".repeat(20),
                reset_url: "http://localhost:4200/reset/x".to_string(),
            },
        )
        .await
        .unwrap();

    // Default policy acknowledges failed deliveries: the queue drains
    // instead of looping the message back.
    for _ in 0..50 {
        if broker.queue_depth(hashtag_events::PASSWORD_RESET_QUEUE) == 0
            && broker.unacked_count(hashtag_events::PASSWORD_RESET_QUEUE) == 0
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queue did not drain after handler failure");
}
