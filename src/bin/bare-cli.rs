use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;

use bare_server::bare::headers::{
    join_bare_headers, X_BARE_HEADERS, X_BARE_HOST, X_BARE_PATH, X_BARE_PORT, X_BARE_PROTOCOL,
    X_BARE_STATUS, X_BARE_STATUS_TEXT, X_BARE_URL,
};
use bare_server::bare::target::RemoteTarget;

#[derive(Parser)]
#[command(name = "bare-cli")]
#[command(about = "Diagnostics CLI for a Bare tunnel server", long_about = None)]
struct Cli {
    /// Server base URL including the prefix.
    #[arg(short, long, default_value = "http://localhost:8080/ca/")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the server manifest
    Manifest,
    /// Fetch a remote URL through the v3 HTTP tunnel
    Fetch {
        remote: String,
    },
    /// Register v2 WebSocket metadata for a remote URL and print its ID
    NewMeta {
        remote: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = if cli.url.ends_with('/') {
        cli.url.clone()
    } else {
        format!("{}/", cli.url)
    };

    match cli.command {
        Commands::Manifest => {
            let res = client.get(&base).send().await?;
            print_json(res).await?;
        }
        Commands::Fetch { remote } => {
            let mut headers = HeaderMap::new();
            headers.insert(X_BARE_URL, HeaderValue::from_str(&remote)?);
            headers.insert(X_BARE_HEADERS, HeaderValue::from_static("{}"));

            let res = client.get(format!("{base}v3/")).headers(headers).send().await?;
            if res.headers().get(X_BARE_STATUS).is_none() && !res.status().is_success() {
                return print_json(res).await;
            }

            let envelope = join_bare_headers(res.headers());
            match envelope.get(X_BARE_STATUS) {
                Some(status) => {
                    let text = envelope
                        .get(X_BARE_STATUS_TEXT)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("");
                    println!("Remote status: {} {}", status.to_str()?, text);
                }
                None => println!("Remote status: {} (passed through)", res.status()),
            }
            if let Some(remote_headers) = envelope.get(X_BARE_HEADERS) {
                let json: Value = serde_json::from_slice(remote_headers.as_bytes())?;
                println!("{}", serde_json::to_string_pretty(&json)?);
            }

            let body = res.bytes().await?;
            println!("Body: {} bytes", body.len());
        }
        Commands::NewMeta { remote } => {
            let target = RemoteTarget::from_url(&remote)?;
            let mut headers = HeaderMap::new();
            headers.insert(X_BARE_HOST, HeaderValue::from_str(&target.host)?);
            headers.insert(X_BARE_PORT, HeaderValue::from(target.port));
            headers.insert(X_BARE_PROTOCOL, HeaderValue::from_str(&format!("{}:", target.scheme.as_str()))?);
            let path = match &target.query {
                Some(query) => format!("{}?{query}", target.path),
                None => target.path.clone(),
            };
            headers.insert(X_BARE_PATH, HeaderValue::from_str(&path)?);
            headers.insert(X_BARE_HEADERS, HeaderValue::from_static("{}"));

            let res = client.post(format!("{base}v2/ws-new-meta")).headers(headers).send().await?;
            if !res.status().is_success() {
                return print_json(res).await;
            }
            println!("{}", res.text().await?);
        }
    }

    Ok(())
}

async fn print_json(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: server returned status {}", status);
    }
    let text = res.text().await?;
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{text}"),
    }
    Ok(())
}
