use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Operator CLI for the service gateway", long_about = None)]
struct Cli {
    #[arg(short, long, env = "GATEWAY_URL", default_value = "http://localhost:8080")]
    url: String,

    /// Bearer token of an admin user; required for `reset`.
    #[arg(short, long, env = "GATEWAY_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway liveness
    Status,
    /// Show circuit breaker state and counters per service
    Breakers,
    /// Force a service's circuit breaker closed
    Reset {
        /// Service name (data, rules)
        service: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Status => client.get(format!("{base}/health")).send().await?,
        Commands::Breakers => client.get(format!("{base}/health/circuit-breakers")).send().await?,
        Commands::Reset { service } => {
            let Some(token) = cli.token else {
                bail!("--token is required to reset a circuit breaker");
            };
            let mut headers = HeaderMap::new();
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}")).context("invalid token")?,
            );
            client
                .post(format!("{base}/admin/circuit-breakers/{service}/reset"))
                .headers(headers)
                .send()
                .await?
        }
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> anyhow::Result<()> {
    let status = res.status();
    let body = res.text().await?;
    let rendered = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|json| serde_json::to_string_pretty(&json).ok())
        .unwrap_or(body);

    if !status.is_success() {
        eprintln!("Error: gateway returned status {status}");
        eprintln!("{rendered}");
        std::process::exit(1);
    }

    println!("{rendered}");
    Ok(())
}
