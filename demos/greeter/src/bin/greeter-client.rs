//! Greeter client.
//!
//! Run with: `cargo run -p rivulet-greeter --bin greeter-client -- --mode chat Alice Bob`

use clap::{Parser, ValueEnum};
use futures::TryStreamExt;
use rivulet::{Codec, RpcSession, Utf8Codec};
use rivulet_greeter::{CHAT, SAY_HELLO, SAY_HELLO_ALL, SAY_HELLO_MANY};
use tokio::net::TcpStream;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Unary,
    ServerStreaming,
    ClientStreaming,
    Bidirectional,
}

#[derive(Debug, Parser)]
#[command(about = "Call the greeter over TCP")]
struct Args {
    /// Server address.
    #[arg(long, default_value = rivulet_greeter::DEFAULT_ADDR)]
    addr: String,

    /// Which call shape to exercise.
    #[arg(long, value_enum, default_value_t = Mode::Unary)]
    mode: Mode,

    /// Names to greet.
    #[arg(default_values_t = ["World".to_string()])]
    names: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let socket = TcpStream::connect(&args.addr).await?;
    socket.set_nodelay(true)?;
    let session = RpcSession::connect(socket);

    match args.mode {
        Mode::Unary => {
            for name in &args.names {
                let reply = session.unary(SAY_HELLO, name.clone()).await?;
                println!("{}", Utf8Codec.decode(&reply)?);
            }
        }
        Mode::ServerStreaming => {
            let call = session
                .server_streaming(SAY_HELLO_MANY, args.names.join(" "))
                .await?;
            let mut replies = std::pin::pin!(call.receive());
            while let Some(reply) = replies.try_next().await? {
                println!("{}", Utf8Codec.decode(reply.payload())?);
            }
        }
        Mode::ClientStreaming => {
            let call = session.client_streaming(SAY_HELLO_ALL)?;
            for name in &args.names {
                call.send_value(&Utf8Codec, name).await?;
            }
            let reply = call.close_and_recv().await?;
            println!("{}", Utf8Codec.decode(reply.payload())?);
        }
        Mode::Bidirectional => {
            let call = session.bidirectional(CHAT)?;
            for name in &args.names {
                call.send_value(&Utf8Codec, name).await?;
                if let Some(reply) = call.recv_value(&Utf8Codec).await? {
                    println!("{reply}");
                }
            }
            call.close_send();
            while let Some(reply) = call.recv_value(&Utf8Codec).await? {
                println!("{reply}");
            }
        }
    }

    session.close();
    Ok(())
}
