//! `ivr-publish` - validate, compile and publish IVR flows from the shell

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use ivr_engine::{compile_flow, validate_flow, violation_messages, EventBus, Flow};
use ivr_publish_service::{FlowService, ServiceConfig};
use manager_protocol::ManagerClient;

#[derive(Parser, Debug)]
#[command(name = "ivr-publish", version, about = "Publish IVR call flows to the switch")]
struct Cli {
    /// Service configuration (JSON)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a flow file and list every violation
    Validate {
        /// Flow JSON file
        flow: PathBuf,
    },
    /// Print the dialplan a flow compiles to
    Compile {
        /// Flow JSON file
        flow: PathBuf,
    },
    /// Validate, deploy and reload a flow
    Publish {
        /// Flow JSON file
        flow: PathBuf,
    },
    /// Ask the switch to reload its dialplan
    Reload,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = ServiceConfig::load_or_default(cli.config.as_deref()).await?;

    match cli.command {
        Command::Validate { flow } => {
            let flow = read_flow(&flow).await?;
            let violations = validate_flow(&flow);
            if violations.is_empty() {
                println!("Flow '{}' is valid", flow.id);
                return Ok(ExitCode::SUCCESS);
            }
            for message in violation_messages(&violations) {
                println!("{}", message);
            }
            Ok(ExitCode::FAILURE)
        }
        Command::Compile { flow } => {
            let flow = read_flow(&flow).await?;
            let compiled = compile_flow(&flow, &config.compiler)?;
            print!("{}", compiled.text);
            Ok(ExitCode::SUCCESS)
        }
        Command::Publish { flow } => {
            let flow = read_flow(&flow).await?;
            let id = flow.id.clone();
            let service = FlowService::from_config(&config, EventBus::new())?;
            service.import_flow(flow).await?;
            let outcome = service.publish_flow(&id).await?;
            println!("Published '{}' to {}", id, outcome.path.display());
            if let Some(warning) = outcome.warning {
                println!("warning: {}", warning);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Reload => {
            let client = ManagerClient::new(config.manager.clone());
            client.ensure_connected().await?;
            client.reload_dialplan().await?;
            if let Err(e) = client.logoff().await {
                log::debug!("Logoff failed: {}", e);
            }
            println!("Dialplan reloaded");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn read_flow(path: &Path) -> Result<Flow, Box<dyn std::error::Error>> {
    let contents = tokio::fs::read_to_string(path).await?;
    let flow: Flow = serde_json::from_str(&contents)?;
    Ok(flow)
}
