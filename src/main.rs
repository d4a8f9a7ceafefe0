use lanchat::{try_create_server, ChatOptions, DiscoveryConfig, ServerConfig, SubnetFilter};
use slog::Drain;
use std::net::SocketAddr;

#[tokio::main]
async fn main() {
    let mut args = std::env::args().skip(1);

    let my_addr: SocketAddr = match args.next().map(|raw| raw.parse()) {
        Some(Ok(addr)) => addr,
        _ => {
            eprintln!("Usage: lanchat <ip:chat-port> [subnet-prefix]");
            eprintln!("Example: lanchat 192.168.0.10:10001 192.168.0.");
            std::process::exit(2);
        }
    };
    let filter = args
        .next()
        .map(SubnetFilter::for_prefix)
        .unwrap_or_else(SubnetFilter::default);

    let logger = root_logger();

    let config = ServerConfig {
        my_addr,
        seed_peers: Vec::new(),
        discovery: Some(DiscoveryConfig {
            filter,
            ..DiscoveryConfig::default()
        }),
        logger: logger.clone(),
        options: ChatOptions::default(),
    };

    let server = match try_create_server(config).await {
        Ok(server) => server,
        Err(e) => {
            slog::error!(logger, "Failed to start the chat server: {}", e);
            std::process::exit(1);
        }
    };

    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    slog::info!(logger, "Shutting down {}", server.my_addr());
}

fn root_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}
