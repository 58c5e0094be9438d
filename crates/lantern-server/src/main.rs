//! Lantern signalling server.
//!
//! Accepts length-prefixed text-message connections, runs one connection
//! router per client, and keeps the process-wide peer directory. All
//! protocol logic lives in `lantern-core`; this binary only wires the
//! listener, the system environment, and logging together.

mod config;
mod env;
mod transport;

use std::{net::SocketAddr, sync::Arc};

use lantern_core::{
    client::{Client, ClientConfig},
    env::Environment,
    hub::Hub,
    routine::Routine,
    routines::MasterRoutine,
};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    config::ServerConfig,
    env::SystemEnv,
    transport::{LengthPrefixedSink, LengthPrefixedStream},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = ServerConfig::from_env()?;
    let hub = Arc::new(Hub::new());
    let env: Arc<dyn Environment> = Arc::new(SystemEnv);

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "lantern signalling server listening");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            },
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let hub = Arc::clone(&hub);
                    let env = Arc::clone(&env);
                    let client_config = config.client_config();
                    tokio::spawn(async move {
                        handle_connection(stream, peer, hub, env, client_config).await;
                    });
                },
                Err(error) => warn!(%error, "failed to accept connection"),
            },
        }
    }

    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<Hub>,
    env: Arc<dyn Environment>,
    config: ClientConfig,
) {
    let connected_at = env.now();
    info!(%peer, "client connected");

    let (read, write) = stream.into_split();
    let stream = Box::new(LengthPrefixedStream::new(read));
    let sink = Box::new(LengthPrefixedSink::new(write));

    let client = Client::new(sink, config);

    let factory = {
        let client = Arc::clone(&client);
        let hub = Arc::clone(&hub);
        let env = Arc::clone(&env);
        move || {
            Box::new(MasterRoutine::new(Arc::clone(&client), Arc::clone(&hub), Arc::clone(&env)))
                as Box<dyn Routine>
        }
    };

    Arc::clone(&client).route(&hub, &env, stream, factory).await;

    // The client was discoverable only while connected.
    if let Some(key) = client.public_key() {
        if let Err(error) = hub.unregister(&key) {
            warn!(%peer, %error, "failed to unregister peer");
        }
    }

    info!(%peer, online_for = ?env.now().duration_since(connected_at), "client disconnected");
}
