use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::info;
use protocol::SharedColors;
use server::game::GameLoop;
use server::registry::SessionRegistry;
use server::session::{accept_loop, SessionContext};
use server::world::{BlockRules, FlatMap, LoginPolicy, MapProvider, OpenBuild, OpenLogin};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

/// Main-method of the application.
/// Parses command-line arguments, then starts the accept loop and the
/// game loop and waits for either to finish or for Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "25565")]
        port: u16,
        /// Server name shown in the handshake
        #[clap(long, default_value = "Classic Server")]
        name: String,
        /// Message of the day shown in the handshake
        #[clap(long, default_value = "Welcome!")]
        motd: String,
        /// Maximum number of simultaneous players
        #[clap(short, long, default_value = "20")]
        max_players: usize,
        /// Tick rate (entity update broadcasts per second)
        #[clap(short, long, default_value = "20")]
        tick_rate: u32,
        /// Player names granted operator permission
        #[clap(long)]
        op: Vec<String>,
        /// Broadcast full position updates every tick instead of deltas
        #[clap(long)]
        relay_all_updates: bool,
        /// Map width (x extent, blocks)
        #[clap(long, default_value = "64")]
        map_width: i16,
        /// Map height (vertical extent, blocks)
        #[clap(long, default_value = "32")]
        map_height: i16,
        /// Map length (y extent, blocks)
        #[clap(long, default_value = "64")]
        map_length: i16,
    }

    // Parse command line arguments
    let args = Args::parse();

    let registry = Arc::new(SessionRegistry::new(args.max_players));
    let colors = Arc::new(SharedColors::default());
    let map: Arc<dyn MapProvider> =
        Arc::new(FlatMap::new(args.map_width, args.map_height, args.map_length));
    let login: Arc<dyn LoginPolicy> = Arc::new(OpenLogin {
        operators: args.op.clone(),
    });
    let rules: Arc<dyn BlockRules> = Arc::new(OpenBuild);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&address).await?;
    info!("listening on {}", address);

    // Spawn the accept loop
    let accept_handle = {
        let ctx = SessionContext {
            registry: Arc::clone(&registry),
            login,
            map: Arc::clone(&map),
            events: event_tx,
            server_name: args.name.clone(),
            motd: args.motd.clone(),
            shutdown: shutdown_rx.clone(),
        };
        tokio::spawn(accept_loop(listener, ctx))
    };

    // Spawn the game loop
    let game_handle = {
        let game = GameLoop {
            registry,
            colors,
            rules,
            map,
            relay_all: args.relay_all_updates,
        };
        let tick = Duration::from_secs_f64(1.0 / f64::from(args.tick_rate.max(1)));
        tokio::spawn(game.run(event_rx, tick, shutdown_rx))
    };

    // Handle shutdown gracefully
    tokio::select! {
        result = accept_handle => {
            if let Err(e) = result {
                eprintln!("Accept loop panicked: {}", e);
            }
        }
        result = game_handle => {
            if let Err(e) = result {
                eprintln!("Game loop panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    // Flag every session to disconnect and give their queues a moment to
    // drain the shutdown kick.
    let _ = shutdown_tx.send(true);
    tokio::time::sleep(Duration::from_millis(200)).await;

    Ok(())
}
