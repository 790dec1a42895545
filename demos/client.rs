//! Demo client binary: connects to the greeter service, sends an `ECHO` and
//! a `GREET` request, and prints round-trip timing.

use std::time::Duration;

use clap::Parser;
use roramu::{client::Client, message::MessageType};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

static ECHO: MessageType<String, String> = MessageType::new("ECHO");
static GREET: MessageType<String, String> = MessageType::new("GREET");

#[derive(Debug, Parser)]
#[command(name = "roramu-demo-client", about = "Demo roramu greeter client")]
struct Args {
    /// WebSocket URL of the greeter service.
    #[arg(long, default_value = "ws://127.0.0.1:9000")]
    url: String,

    /// Name to greet.
    #[arg(long, default_value = "world")]
    name: String,
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

    let client = Client::connect(&args.url).await?;

    let echo = client
        .send_request(&ECHO, &"ping".to_string(), Duration::from_secs(5))
        .await?;
    echo.throw_if_error()?;
    tracing::info!(
        reply = %echo.get_response()?,
        roundtrip_ms = ?echo.roundtrip_millis(),
        "ECHO complete"
    );

    let greet = client
        .send_request(&GREET, &args.name, Duration::from_secs(5))
        .await?;
    greet.throw_if_error()?;
    tracing::info!(reply = %greet.get_response()?, "GREET complete");

    client.close().await?;
    Ok(())
}
