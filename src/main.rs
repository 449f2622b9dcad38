use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use webconsole_operator::controller::{
    self, check_certificate_expiry, detect_capabilities, ControllerState, KindRegistry,
    KubeClusterClient, KubeDiscoveryClient,
};
use webconsole_operator::crd::WebConsole;
use webconsole_operator::settings::OperatorSettings;
use webconsole_operator::Error;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version information
    Version,
    /// Show detected cluster capabilities and managed consoles
    Info,
    /// Delete certificate secrets close to expiry so they are re-issued
    CheckCertificateExpiry(ExpiryArgs),
}

#[derive(ClapArgs, Debug)]
struct RunArgs {
    #[command(flatten)]
    settings: OperatorSettings,
}

#[derive(ClapArgs, Debug)]
struct ExpiryArgs {
    /// Namespace holding the certificate secrets
    #[arg(long)]
    cert_namespace: String,

    /// Hours before expiry at which a certificate is rotated
    #[arg(long, default_value_t = 24)]
    cert_expiration_period: i64,

    /// Upper bound on every API server call, in seconds
    #[arg(long, env = "API_TIMEOUT_SECS", default_value_t = 30)]
    api_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("WebConsole Operator v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Info => {
            init_tracing(args.log_json);
            run_info().await
        }
        Commands::CheckCertificateExpiry(expiry_args) => {
            init_tracing(args.log_json);
            run_expiry_check(expiry_args).await
        }
        Commands::Run(run_args) => {
            init_tracing(args.log_json);
            run_operator(run_args).await
        }
    }
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

async fn run_info() -> Result<(), Error> {
    // Initialize Kubernetes client
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    let facts = detect_capabilities(&KubeDiscoveryClient::new(client.clone())).await?;
    println!("Platform version: {}", facts.platform_version);
    println!("OpenShift: {}", facts.is_extended_platform);
    println!("Routes: {}", facts.supports_routes);
    println!("Console links: {}", facts.supports_platform_links);

    let api: kube::Api<WebConsole> = kube::Api::all(client);
    let consoles = api
        .list(&Default::default())
        .await
        .map_err(Error::KubeError)?;

    println!("Managed WebConsoles: {}", consoles.items.len());
    Ok(())
}

async fn run_expiry_check(args: ExpiryArgs) -> Result<(), Error> {
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;
    let cluster = KubeClusterClient::new(
        client,
        Arc::new(KindRegistry::new()),
        Duration::from_secs(args.api_timeout_secs),
    );

    let deleted = check_certificate_expiry(
        &cluster,
        &args.cert_namespace,
        args.cert_expiration_period,
        Utc::now(),
    )
    .await?;
    info!(
        "Certificate expiry check in {} deleted {} secret(s)",
        args.cert_namespace,
        deleted.len()
    );
    Ok(())
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    let settings = args.settings;
    settings.validate()?;

    info!(
        "Starting WebConsole Operator v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Initialize Kubernetes client
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    // Capabilities are fixed for the life of the process.
    let facts = detect_capabilities(&KubeDiscoveryClient::new(client.clone())).await?;
    info!(
        "Detected platform {} (openshift: {}, routes: {}, console links: {})",
        facts.platform_version,
        facts.is_extended_platform,
        facts.supports_routes,
        facts.supports_platform_links
    );

    let registry = Arc::new(KindRegistry::new());
    let cluster = KubeClusterClient::new(client.clone(), registry, settings.api_timeout());

    // Create shared controller state
    let state = Arc::new(ControllerState {
        client: Arc::new(cluster),
        facts,
        settings,
    });

    // Run the main controller loop
    controller::run_controller(client, state).await
}
