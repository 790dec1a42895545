//! End-to-end: a typed `GREET` op over a real connection.

mod support;

use std::time::Duration;

use roramu::{message::MessageType, service::Service};

static GREET: MessageType<String, String> = MessageType::new("GREET");

#[tokio::test]
async fn greet_formats_the_name() {
    let service = Service::new("greeter");
    service
        .handlers()
        .register(&GREET, |name: String| async move { Ok(format!("Hello, {name}!")) })
        .expect("GREET is not a reserved op");

    let running = support::spawn(service).await;
    let client = support::connected_client(&running).await;

    let reply = client
        .send_request(&GREET, &"World".to_string(), Duration::from_secs(5))
        .await
        .expect("send succeeds");

    assert!(reply.is_successful());
    assert_eq!(reply.get_response().expect("decode"), "Hello, World!");
}
