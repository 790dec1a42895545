//! Shared harness for the end-to-end scenario tests: spins up a real
//! `Service` on an ephemeral port and hands back a `Client` already
//! connected to it.

use std::{net::SocketAddr, sync::Arc};

use roramu::{client::Client, service::Service};
use tokio::{net::TcpListener, task::JoinHandle};

/// A running service plus a handle that, dropped or aborted, tears it down.
pub struct RunningService {
    pub addr: SocketAddr,
    pub service: Arc<Service>,
    _accept_loop: JoinHandle<()>,
}

impl RunningService {
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }
}

/// Bind `service` on an OS-assigned port and start accepting connections.
pub async fn spawn(service: Service) -> RunningService {
    let service = Arc::new(service);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    let accepting = service.clone();
    accepting.start_keepalive().await;
    let accept_loop = tokio::spawn(async move {
        loop {
            let Ok((stream, _peer)) = listener.accept().await else {
                return;
            };
            let svc = accepting.clone();
            tokio::spawn(async move {
                let _ = svc.accept_stream(stream).await;
            });
        }
    });

    RunningService {
        addr,
        service,
        _accept_loop: accept_loop,
    }
}

pub async fn connected_client(running: &RunningService) -> Client {
    Client::connect(&running.url()).await.expect("connect to demo service")
}
