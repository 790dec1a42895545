//! End-to-end: the built-in `STATUS` op, including the requirement that
//! an extension that throws still yields a status, never an `ERROR` reply.

mod support;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use roramu::{
    envelope::OP_STATUS,
    error::Error,
    message::MessageType,
    service::Service,
    status::{ServiceStatus, StatusExtension},
};
use serde_json::Value;

static STATUS: MessageType<(), ServiceStatus> = MessageType::new(OP_STATUS);

struct FailingExtension;

#[async_trait]
impl StatusExtension for FailingExtension {
    async fn extend(&self) -> Result<Value, Error> {
        Err(Error::Timeout)
    }
}

#[tokio::test]
async fn status_with_no_extension_decodes_to_a_status_object() {
    let service = Service::new("status-only");
    let running = support::spawn(service).await;
    let client = support::connected_client(&running).await;

    let reply = client
        .send_request(&STATUS, &(), Duration::from_secs(5))
        .await
        .expect("send succeeds");

    assert!(reply.is_successful());
    let status = reply.get_response().expect("decode status");
    assert!(status.extension.is_none());
}

#[tokio::test]
async fn failing_extension_still_yields_a_successful_status() {
    let service = Service::new("status-with-extension");
    service.set_status_extension(Arc::new(FailingExtension)).await;

    let running = support::spawn(service).await;
    let client = support::connected_client(&running).await;

    let reply = client
        .send_request(&STATUS, &(), Duration::from_secs(5))
        .await
        .expect("send succeeds");

    assert!(reply.is_successful(), "a failing extension must not produce an ERROR reply");
    let status = reply.get_response().expect("decode status");
    assert!(status.extension.is_some(), "the failure is folded into the extension slot");
}
