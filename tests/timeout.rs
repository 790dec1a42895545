//! End-to-end: a handler slower than the caller's timeout resolves to an
//! unsuccessful `Response`, not an `Err`.

mod support;

use std::time::Duration;

use roramu::{message::MessageType, service::Service};

static SLOW: MessageType<(), ()> = MessageType::new("SLOW");

#[tokio::test]
async fn slow_handler_times_out_into_an_error_response() {
    let timeout = Duration::from_millis(50);
    let service = Service::new("slow-service");
    service
        .handlers()
        .register(&SLOW, move |(): ()| async move {
            tokio::time::sleep(timeout * 2).await;
            Ok(())
        })
        .expect("SLOW is not a reserved op");

    let running = support::spawn(service).await;
    let client = support::connected_client(&running).await;

    let reply = client
        .send_request(&SLOW, &(), timeout)
        .await
        .expect("send itself succeeds even though the reply times out");

    assert!(!reply.is_successful());
    assert!(reply.throw_if_error().is_err());
}
