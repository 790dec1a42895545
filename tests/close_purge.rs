//! End-to-end: three outstanding calls on a session that gets closed out
//! from under the client all complete with a "session closed" error within
//! bounded time.

mod support;

use std::{sync::Arc, time::Duration};

use roramu::{envelope::OP_CLOSE_ALL_SESSIONS, message::MessageType, service::Service};

static NEVER: MessageType<(), ()> = MessageType::new("NEVER");
static CLOSE_ALL: MessageType<(), ()> = MessageType::new(OP_CLOSE_ALL_SESSIONS);

#[tokio::test]
async fn outstanding_calls_are_purged_when_the_session_closes() {
    let service = Service::new("purge-service");
    service
        .handlers()
        .register(&NEVER, |(): ()| async move {
            tokio::time::sleep(Duration::from_secs(300)).await;
            Ok(())
        })
        .expect("NEVER is not a reserved op");

    let running = support::spawn(service).await;
    let client = Arc::new(support::connected_client(&running).await);

    let calls = (0..3)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.send_request(&NEVER, &(), Duration::ZERO).await })
        })
        .collect::<Vec<_>>();

    // Give the three requests time to register with the pending-call
    // registry before the session goes away.
    tokio::time::sleep(Duration::from_millis(50)).await;
    client
        .send_message(&CLOSE_ALL, &())
        .await
        .expect("asking the service to close all sessions");

    let results = tokio::time::timeout(Duration::from_secs(5), futures_util::future::join_all(calls))
        .await
        .expect("all three outstanding calls resolve within the bound");

    for joined in results {
        let reply = joined.expect("task did not panic").expect("send itself did not fail");
        assert!(!reply.is_successful(), "a purged call must resolve as an error, not hang");
    }
}
