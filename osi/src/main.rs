//! Command line entry point for the OSI model simulation.
//!
//! Runs one complete protocol stack in either role:
//!
//! ```text
//! osi server --host localhost --port 12345
//! osi client --host localhost --port 12345
//! ```
//!
//! The server answers requests on a few demonstration routes until its peer
//! disconnects. The client walks through those routes and prints the
//! responses. Set `RUST_LOG=debug` to watch every layer handle the traffic.

use anyhow::Context;
use clap::{Parser, Subcommand};
use osi_core::layers::application::{HttpRequest, HttpResponse};
use osi_core::layers::network::Ipv4Address;
use osi_core::layers::PhysicalLayer;
use osi_core::utility::Endpoint;
use osi_core::{Role, Stack};
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Stores the command line arguments.
#[derive(Parser)]
#[command(about = "A simulation of the OSI seven-layer reference model")]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Run as a server, answering requests from a single client
    Server {
        /// Host to bind to
        #[arg(long, default_value = "localhost")]
        host: String,
        /// Port to use
        #[arg(long, default_value_t = 12345)]
        port: u16,
    },
    /// Run as a client, sending the demonstration requests
    Client {
        /// Host to connect to
        #[arg(long, default_value = "localhost")]
        host: String,
        /// Port to use
        #[arg(long, default_value_t = 12345)]
        port: u16,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.mode {
        Mode::Server { host, port } => run_server(&host, port),
        Mode::Client { host, port } => run_client(&host, port),
    }
}

fn run_server(host: &str, port: u16) -> anyhow::Result<()> {
    println!("Starting OSI Model Simulation Server on {host}:{port}");

    let stack = Stack::build(Role::Server, host, port);
    stack.application().add_route("/", Arc::new(index_handler));
    stack.application().add_route("/echo", Arc::new(echo_handler));
    stack.application().add_route("/time", Arc::new(time_handler));

    stack
        .physical()
        .initialize()
        .context("failed to open the medium")?;

    println!("Server is running. Press Ctrl+C to stop.");
    while stack.physical().receive().context("receive failed")? {}
    tracing::info!("peer disconnected, shutting down");

    stack.physical().close();
    Ok(())
}

fn run_client(host: &str, port: u16) -> anyhow::Result<()> {
    println!("Starting OSI Model Simulation Client, connecting to {host}:{port}");

    let stack = Stack::build(Role::Client, host, port);
    stack
        .physical()
        .initialize()
        .context("failed to reach the server")?;

    // The logical address for the session; hostnames fall back to loopback
    let address = host.parse().unwrap_or(Ipv4Address::LOCALHOST);
    stack
        .application()
        .set_remote(Endpoint::new(address, port));

    let requests = [
        HttpRequest::new("GET", "/").with_header("User-Agent", "OSI-Model-Client"),
        HttpRequest::new("POST", "/echo")
            .with_header("Content-Type", "text/plain")
            .with_body("Hello, OSI Model!"),
        HttpRequest::new("GET", "/time").with_header("User-Agent", "OSI-Model-Client"),
    ];

    for request in requests {
        println!("\nSending request to {}", request.path);
        stack.application().send_request(
            request,
            Some(Box::new(|response| println!("{response}"))),
        );

        // Give the server a moment, then collect whatever it sent back
        thread::sleep(Duration::from_secs(1));
        drain(stack.physical())?;
    }

    println!("\nAll requests completed.");
    stack.physical().close();
    Ok(())
}

/// Pumps inbound frames until the medium goes quiet.
fn drain(physical: &PhysicalLayer) -> anyhow::Result<()> {
    physical.set_read_timeout(Some(Duration::from_millis(500)))?;
    loop {
        match physical.receive() {
            Ok(true) => continue,
            Ok(false) => break,
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                break
            }
            Err(err) => return Err(err).context("receive failed"),
        }
    }
    Ok(())
}

fn index_handler(_request: &HttpRequest) -> HttpResponse {
    HttpResponse::new(200, "OK")
        .with_header("Content-Type", "text/html")
        .with_body("<html><body><h1>Welcome to the OSI Model Simulation</h1></body></html>")
}

fn echo_handler(request: &HttpRequest) -> HttpResponse {
    HttpResponse::new(200, "OK")
        .with_header("Content-Type", "text/plain")
        .with_body(request.body.clone())
}

fn time_handler(_request: &HttpRequest) -> HttpResponse {
    HttpResponse::new(200, "OK")
        .with_header("Content-Type", "text/plain")
        .with_body(format!(
            "The current time is: {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        ))
}
