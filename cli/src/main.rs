use anyhow::Result;
use aiops::server;
use aiops_core::Config;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "aiops")]
#[command(about = "Self-learning anomaly detection and root cause analysis", long_about = None)]
struct Cli {
    /// Path to a TOML config file. Falls back to defaults if not found.
    #[arg(short, long, default_value = "aiops.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the AIOps server (ingest + Read API + background scheduler)
    Serve {
        #[arg(short, long)]
        port: Option<u16>,

        #[arg(short = 'H', long)]
        host: Option<String>,

        #[arg(short, long)]
        verbose: bool,
    },

    /// Trigger an analysis pass and print any incidents it produced
    Analyze {
        #[arg(short, long, default_value = "http://localhost:8080")]
        server: String,
    },

    /// List currently active incidents
    Incidents {
        #[arg(short, long, default_value = "http://localhost:8080")]
        server: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_file_or_default(&cli.config);

    match cli.command {
        Commands::Serve { port, host, verbose } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            if verbose {
                config.server.verbose = true;
            }
            config.validate()?;
            server::start_server(config).await?;
        }
        Commands::Analyze { server } => {
            trigger_analysis(&server).await?;
        }
        Commands::Incidents { server } => {
            list_incidents(&server).await?;
        }
    }

    Ok(())
}

async fn trigger_analysis(server: &str) -> Result<()> {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/aiops/analyze", server))
        .send()
        .await?;
    let body: serde_json::Value = response.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn list_incidents(server: &str) -> Result<()> {
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/aiops/incidents", server))
        .send()
        .await?;
    let body: serde_json::Value = response.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
