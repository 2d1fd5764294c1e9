use clap::{value_parser, Arg, Command};
use server::{Server, ServerConfig};
use std::path::PathBuf;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "messenger server starting");

    let matches = Command::new("Messenger Server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Real-time messenger server with VoIP signalling")
        .arg(
            Arg::new("bind")
                .help("Address to bind both listeners to")
                .long("bind")
                .default_value("0.0.0.0"),
        )
        .arg(
            Arg::new("tcp_port")
                .help("Port of the framed (encrypted) stream transport")
                .short('t')
                .long("tcp-port")
                .value_parser(value_parser!(u16))
                .default_value("1234"),
        )
        .arg(
            Arg::new("ws_port")
                .help("Port of the WebSocket transport")
                .short('w')
                .long("ws-port")
                .value_parser(value_parser!(u16))
                .default_value("8080"),
        )
        .arg(
            Arg::new("db")
                .help("Path of the SQLite database file")
                .long("db")
                .default_value("messenger.db"),
        )
        .get_matches();

    let config = ServerConfig {
        bind_addr: matches
            .get_one::<String>("bind")
            .expect("bind has a default")
            .clone(),
        tcp_port: *matches
            .get_one::<u16>("tcp_port")
            .expect("tcp_port has a default"),
        ws_port: *matches
            .get_one::<u16>("ws_port")
            .expect("ws_port has a default"),
        db_path: PathBuf::from(matches.get_one::<String>("db").expect("db has a default")),
    };

    let server = Server::bind(&config).await.expect("failed to start server");

    tokio::select! {
        () = server.run() => {}
        _ = shutdown_signal() => {
            info!("shutting down");
        }
    }
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
