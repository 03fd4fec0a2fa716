use std::net::SocketAddr;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "gateway-ctl")]
#[command(about = "Control client for a running app-gateway", long_about = None)]
struct Cli {
    /// Control API base URL.
    #[arg(short, long, default_value = "http://127.0.0.1:8081", env = "GATEWAY_CONTROL_URL")]
    url: String,

    /// Bearer token configured as `admin.api_key`.
    #[arg(short, long, env = "GATEWAY_CONTROL_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drop cached documents, optionally only those with a tag
    FlushCache {
        #[arg(long)]
        tag: Option<String>,
    },
    /// Clear every failure mark of a node
    Enable { node: SocketAddr },
    /// Stop sending new sessions to a node
    Fade { node: SocketAddr },
    /// Show whether a node is ok, fading or failed
    Status { node: SocketAddr },
    /// Cache, connection pool and failure summary
    Stats,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool, Box<dyn std::error::Error>> {
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let (method, path) = match &cli.command {
        Commands::FlushCache { .. } => (Method::POST, "/control/flush-cache".to_string()),
        Commands::Enable { node } => (Method::POST, format!("/control/nodes/{node}/enable")),
        Commands::Fade { node } => (Method::POST, format!("/control/nodes/{node}/fade")),
        Commands::Status { node } => (Method::GET, format!("/control/nodes/{node}")),
        Commands::Stats => (Method::GET, "/control/stats".to_string()),
    };

    let mut request = client
        .request(method, format!("{base}{path}"))
        .headers(headers);
    if let Commands::FlushCache { tag: Some(tag) } = &cli.command {
        request = request.query(&[("tag", tag)]);
    }

    print_response(request.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<bool, Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: control API returned status {}", status);
        if let Ok(text) = res.text().await {
            if !text.is_empty() {
                eprintln!("Response: {}", text);
            }
        }
        return Ok(false);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(true)
}
