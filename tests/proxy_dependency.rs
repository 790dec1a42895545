//! End-to-end: a frontend service that resolves a `ServiceProxy<Client>`
//! named "backend" and forwards its own `GREET` calls to the backend's
//! `GREET`.

mod support;

use std::{sync::Arc, time::Duration};

use roramu::{client::Client, message::MessageType, proxy::ServiceProxy, service::Service};

static GREET: MessageType<String, String> = MessageType::new("GREET");

#[tokio::test]
async fn frontend_forwards_greet_to_backend_through_a_proxy() {
    let backend = Service::new("backend");
    backend
        .handlers()
        .register(&GREET, |name: String| async move { Ok(format!("Hello, {name}!")) })
        .expect("GREET is not a reserved op");
    let backend = support::spawn(backend).await;

    let proxy = Arc::new(ServiceProxy::<Client>::new("backend", backend.url()));

    let frontend = Service::new("frontend");
    frontend
        .handlers()
        .register(&GREET, move |name: String| {
            let proxy = proxy.clone();
            async move {
                let backend_client = proxy.get().await?;
                let reply = backend_client
                    .send_request(&GREET, &name, Duration::from_secs(5))
                    .await?;
                reply.throw_if_error()?;
                reply.get_response()
            }
        })
        .expect("GREET is not a reserved op");

    let frontend = support::spawn(frontend).await;
    let frontend_client = support::connected_client(&frontend).await;

    let reply = frontend_client
        .send_request(&GREET, &"World".to_string(), Duration::from_secs(5))
        .await
        .expect("send succeeds");

    assert!(reply.is_successful());
    assert_eq!(reply.get_response().expect("decode"), "Hello, World!");
}
