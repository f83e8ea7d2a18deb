//! huddle-signal: standalone signaling server.
//!
//! ```bash
//! RUST_LOG=info huddle-signal --addr 0.0.0.0:8080 --room-capacity 4
//! ```

use clap::Parser;
use log::info;

use huddle_signal::{ServerConfig, SignalServer, DEFAULT_ROOM_CAPACITY};

#[derive(Parser, Debug)]
#[command(name = "huddle-signal", version, about = "Room-based WebRTC signaling server")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "HUDDLE_ADDR", default_value = "127.0.0.1:8080")]
    addr: String,

    /// Maximum participants per room
    #[arg(long, env = "HUDDLE_ROOM_CAPACITY", default_value_t = DEFAULT_ROOM_CAPACITY)]
    room_capacity: usize,

    /// Frames queued per connection before it is dropped as a slow consumer
    #[arg(long, env = "HUDDLE_OUTBOUND_BUFFER", default_value_t = 256)]
    outbound_buffer: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();
    let args = Args::parse();

    if args.room_capacity == 0 {
        return Err("--room-capacity must be at least 1".into());
    }

    let config = ServerConfig {
        bind_addr: args.addr,
        room_capacity: args.room_capacity,
        outbound_buffer: args.outbound_buffer,
    };
    info!("Starting huddle-signal on {}", config.bind_addr);

    let server = SignalServer::new(config);
    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}
