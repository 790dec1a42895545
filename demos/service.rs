//! Demo service binary: a "greeter" exercising `ECHO`, `GREET`, and the
//! built-in `STATUS`/`CLOSE_ALL_SESSIONS` ops end to end over a real
//! WebSocket listener.

use std::{net::SocketAddr, sync::Arc};

use clap::Parser;
use roramu::{message::MessageType, service::Service};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

static ECHO: MessageType<String, String> = MessageType::new("ECHO");
static GREET: MessageType<String, String> = MessageType::new("GREET");

#[derive(Debug, Parser)]
#[command(name = "roramu-demo-service", about = "Demo roramu greeter service")]
struct Args {
    /// Address to bind the WebSocket listener on.
    #[arg(long, default_value = "127.0.0.1:9000")]
    bind: SocketAddr,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<(), roramu::Error> {
    init_logging();
    let args = Args::parse();

    let service = Arc::new(Service::new("greeter"));
    service
        .handlers()
        .register(&ECHO, |message: String| async move { Ok(message) })
        .expect("ECHO is not a reserved op");
    service
        .handlers()
        .register(&GREET, |name: String| async move { Ok(format!("Hello, {name}!")) })
        .expect("GREET is not a reserved op");

    tracing::info!(bind = %args.bind, "starting greeter service");
    service.serve(args.bind).await
}
