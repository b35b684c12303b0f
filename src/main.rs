use clap::{Parser, Subcommand};
use log::{error, info, warn};
use qonic_api::client::ClientConfig;
use qonic_api::{ApiClient, ChangeSet, ModelTarget, OperationStatus};
use qonic_auth::oauth::{AuthorizationFlow, FlowConfig, ManualBrowser};
use secrecy::SecretString;
use service::{config::Config, logging::Logger};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(author, version, about = "Sign in to Qonic and work with its models", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: Config,

    /// Print the authorization URL instead of opening a browser
    #[arg(long, global = true)]
    no_browser: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, clap::Args)]
struct ModelArgs {
    #[arg(long)]
    project: String,
    #[arg(long)]
    model: String,
}

impl ModelArgs {
    fn target(&self) -> ModelTarget {
        ModelTarget::new(&self.project, &self.model)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the browser sign-in and report the result
    Login,
    /// Apply a JSON changeset of field edits inside a modification session
    Modify {
        #[command(flatten)]
        model: ModelArgs,
        /// File holding `{"add": ..., "update": ..., "delete": ...}`
        #[arg(long)]
        changes: PathBuf,
    },
    /// Delete one product inside a modification session
    DeleteProduct {
        #[command(flatten)]
        model: ModelArgs,
        #[arg(long)]
        guid: String,
    },
    /// Export the model as IFC and print the download URL
    ExportIfc {
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Calculate quantities and print the result URL
    Quantities {
        #[command(flatten)]
        model: ModelArgs,
        /// Calculator to run, e.g. Length or GrossArea; may be repeated
        #[arg(long = "calculator", required = true)]
        calculators: Vec<String>,
    },
    /// Poll an operation until it finishes and print its final status
    WaitOperation {
        #[arg(long)]
        id: String,
    },
}

/// How a successful command ended.
#[derive(Debug, PartialEq)]
enum Outcome {
    Done,
    /// Some field edits were rejected by the server.
    Rejected,
    /// The awaited operation finished as `Failed`.
    Failed,
}

impl Outcome {
    fn exit_code(&self) -> ExitCode {
        match self {
            Outcome::Done => ExitCode::SUCCESS,
            Outcome::Rejected => ExitCode::from(2),
            Outcome::Failed => ExitCode::from(1),
        }
    }
}

/// Outcome of a command that waited for an operation to finish.
fn outcome_of(status: OperationStatus) -> Outcome {
    match status {
        OperationStatus::Failed => Outcome::Failed,
        _ => Outcome::Done,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env before clap reads the environment
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    if let Err(e) = Logger::init_logger(&cli.config) {
        eprintln!("Failed to start logging: {e}");
    }

    let flow = match flow_config(&cli.config) {
        Ok(flow_config) => {
            let flow = AuthorizationFlow::new(flow_config);
            if cli.no_browser {
                flow.with_browser(Box::new(ManualBrowser))
            } else {
                flow
            }
        }
        Err(message) => {
            error!("{message}");
            return ExitCode::from(1);
        }
    };

    // Read the changeset before signing in so a bad file fails without network calls
    let changes = match &cli.command {
        Command::Modify { changes, .. } => match load_changes(changes) {
            Ok(changes) => Some(changes),
            Err(message) => {
                error!("{message}");
                return ExitCode::from(1);
            }
        },
        _ => None,
    };

    let client_config = ClientConfig {
        timeout: cli.config.request_timeout(),
        ..ClientConfig::default()
    };
    let mut client = match ApiClient::with_config(cli.config.api_url(), client_config) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build the API client: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = client.authorize(&flow).await {
        error!("Sign-in failed: {e}");
        return ExitCode::from(1);
    }
    info!("Signed in to {}", client.base_url());

    match run(&cli, &mut client, changes).await {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            error!("{e}");
            ExitCode::from(1)
        }
    }
}

fn flow_config(config: &Config) -> Result<FlowConfig, String> {
    let client_id = config
        .client_id()
        .ok_or("No client id provided; set CLIENT_ID or --client-id")?;
    let client_secret = config
        .client_secret()
        .ok_or("No client secret provided; set CLIENT_SECRET or --client-secret")?;

    Ok(FlowConfig {
        client_id,
        client_secret: SecretString::new(client_secret),
        issuer_url: config.issuer_url().to_string(),
        scope: config.scopes.clone(),
        redirect_uri: config.redirect_uri.clone(),
        callback_port: config.callback_port,
        callback_timeout: config.callback_timeout(),
    })
}

fn load_changes(path: &Path) -> Result<ChangeSet, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let changes: ChangeSet = serde_json::from_str(&contents)
        .map_err(|e| format!("{} is not a valid changeset: {e}", path.display()))?;
    if changes.is_empty() {
        warn!("{} contains no field edits", path.display());
    }
    Ok(changes)
}

async fn run(
    cli: &Cli,
    client: &mut ApiClient,
    changes: Option<ChangeSet>,
) -> Result<Outcome, qonic_api::Error> {
    let poll_interval = cli.config.poll_interval();
    let deadline = cli.config.operation_timeout();

    match &cli.command {
        Command::Login => {
            println!("Login successful");
            Ok(Outcome::Done)
        }
        Command::Modify { model, .. } => {
            let changes = changes.unwrap_or_default();
            let errors = client
                .run_bracketed_modification(&model.target(), &changes)
                .await?;
            if errors.is_empty() {
                println!("Applied {} field edits", changes.len());
                return Ok(Outcome::Done);
            }
            for field_error in &errors {
                println!("{field_error}");
            }
            Ok(Outcome::Rejected)
        }
        Command::DeleteProduct { model, guid } => {
            client.run_bracketed_delete(&model.target(), guid).await?;
            println!("Deleted product {guid}");
            Ok(Outcome::Done)
        }
        Command::ExportIfc { model } => {
            let target = model.target();
            let started = client.start_export_ifc(&target).await?;
            let finished = client
                .await_operation(&started.id, poll_interval, deadline)
                .await?;
            if let Outcome::Failed = outcome_of(finished.status) {
                error!("Export {} failed", finished.id);
                return Ok(Outcome::Failed);
            }
            println!("{}", client.export_ifc_result_url(&target, &finished.id).await?);
            Ok(Outcome::Done)
        }
        Command::Quantities { model, calculators } => {
            let target = model.target();
            let started = client
                .calculate_quantities(&target, calculators, &[])
                .await?;
            let finished = client
                .await_operation(&started.id, poll_interval, deadline)
                .await?;
            if let Outcome::Failed = outcome_of(finished.status) {
                error!("Quantity calculation {} failed", finished.id);
                return Ok(Outcome::Failed);
            }
            println!("{}", client.quantities_result_url(&target, &finished.id).await?);
            Ok(Outcome::Done)
        }
        Command::WaitOperation { id } => {
            let finished = client.await_operation(id, poll_interval, deadline).await?;
            println!("{}: {}", finished.id, finished.status);
            Ok(outcome_of(finished.status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_operation_is_a_failure() {
        assert_eq!(outcome_of(OperationStatus::Failed), Outcome::Failed);
        assert_eq!(outcome_of(OperationStatus::Ready), Outcome::Done);
        assert_eq!(Outcome::Failed.exit_code(), ExitCode::from(1));
    }

    #[test]
    fn test_field_rejections_exit_with_two() {
        assert_eq!(Outcome::Rejected.exit_code(), ExitCode::from(2));
        assert_eq!(Outcome::Done.exit_code(), ExitCode::SUCCESS);
    }

    #[test]
    fn test_wait_operation_arguments() {
        let cli = Cli::try_parse_from(["qonic", "wait-operation", "--id", "op1"]).unwrap();
        assert!(matches!(cli.command, Command::WaitOperation { ref id } if id == "op1"));
    }
}
