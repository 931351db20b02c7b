//! Workshop operator - provisions multi-tenant GitOps workshops

use std::sync::Arc;

use clap::{Parser, Subcommand};

use workshop_common::store::create_client;
use workshop_common::telemetry::init_tracing;
use workshop_operator::crds::{crd_yaml, ensure_crds_installed};
use workshop_operator::{run_controller, Context, OperatorArgs, OperatorConfig};

/// Workshop operator - tenant identities and GitOps projects from one CRD
#[derive(Parser, Debug)]
#[command(name = "workshop-operator", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    args: OperatorArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the Workshop controller (default)
    Controller,
    /// Print the Workshop CRD manifest and exit
    Crd,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Crd) = cli.command {
        println!("{}", crd_yaml()?);
        return Ok(());
    }

    init_tracing(cli.args.log_format)?;

    let config = OperatorConfig::from(&cli.args);
    config.validate()?;

    let client = create_client(cli.args.kubeconfig.as_deref()).await?;
    ensure_crds_installed(&client).await?;

    tracing::info!(
        staging_dir = %config.staging_dir.display(),
        hash_cost = config.hash_cost,
        "workshop operator starting"
    );
    let ctx = Arc::new(Context::new(client.clone(), config)?);
    run_controller(client, ctx).await;
    Ok(())
}
