//! # Edge Provisioning CLI
//!
//! Command-line tool for fleet provisioning:
//! - Provision this device with its claim credential
//! - Clean orphaned things and certificates across the fleet
//! - Show the persisted provisioning config
//!
//! ## Usage
//!
//! ```bash
//! # Provision this device (no-op if already provisioned)
//! edge-provision provision
//!
//! # Remove a stale thing of the same name first
//! edge-provision provision --preclean --region eu-west-1
//!
//! # Preview a fleet cleanup
//! edge-provision cleanup --region eu-west-1 --dry-run
//!
//! # Clean without the confirmation prompt
//! edge-provision cleanup --region eu-west-1 --force
//!
//! # Show provisioning state
//! edge-provision show
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use device_client::storage::load_claim_config;
use device_client::{
    CredentialStore, DeviceProbe, MqttTransport, ProvisioningOrchestrator, ProvisioningOutcome,
};
use registry_service::{AwsIotRegistry, LifecycleCleaner};
use shared::{
    config::DeviceClientConfig,
    constants::{DEFAULT_CLAIM_DIR, DEFAULT_IOT_DIR, THING_TYPE},
    types::CleanupReport,
};

#[derive(Parser)]
#[command(name = "edge-provision")]
#[command(about = "Zero-touch fleet provisioning for edge devices")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory for the device credential and provisioning config
    #[arg(long, global = true, default_value = DEFAULT_IOT_DIR)]
    iot_dir: PathBuf,

    /// Directory holding the claim credential and claim config
    #[arg(long, global = true, default_value = DEFAULT_CLAIM_DIR)]
    claim_dir: PathBuf,

    /// Debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision this device with its claim credential
    Provision {
        /// Remove any existing thing of this device's name first
        #[arg(long)]
        preclean: bool,

        /// Registry region for --preclean (default: SDK region chain)
        #[arg(long)]
        region: Option<String>,
    },

    /// Find and remove orphaned things and certificates
    Cleanup {
        /// Registry region (default: SDK region chain)
        #[arg(long)]
        region: Option<String>,

        /// Report findings without deleting anything
        #[arg(long)]
        dry_run: bool,

        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,

        /// Thing type managed by this fleet
        #[arg(long, default_value = THING_TYPE)]
        thing_type: String,
    },

    /// Show the persisted provisioning config
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = DeviceClientConfig {
        iot_dir: cli.iot_dir,
        claim_dir: cli.claim_dir,
        ..Default::default()
    };

    match cli.command {
        Commands::Provision { preclean, region } => {
            provision(config, preclean, region).await?;
        }
        Commands::Cleanup {
            region,
            dry_run,
            force,
            thing_type,
        } => {
            cleanup(region, dry_run, force, &thing_type).await?;
        }
        Commands::Show => {
            show(&config).await?;
        }
    }

    Ok(())
}

async fn provision(config: DeviceClientConfig, preclean: bool, region: Option<String>) -> Result<()> {
    config.validate()?;

    // The claim credential may be gone once provisioned
    let store = CredentialStore::new(&config);
    if let Some(existing) = store.provisioned_config().await? {
        println!("Device already provisioned as {}", existing.thing_name);
        return Ok(());
    }

    let claim = load_claim_config(&config.claim_dir).await?;
    let identity = DeviceProbe::new(config.probe.clone()).identity().await?;

    info!(
        thing_name = %identity.name,
        endpoint = %claim.endpoint,
        template = %claim.template_name,
        "Starting provisioning"
    );

    let claim_credentials = config.claim_credentials();
    let transport = Arc::new(MqttTransport::new(
        claim.endpoint.clone(),
        config.exchange.clone(),
        config.ca_path(),
        claim_credentials.cert_path,
        claim_credentials.key_path,
    ));

    let mut orchestrator = ProvisioningOrchestrator::new(config, claim, identity, transport);
    if preclean {
        let registry = Arc::new(AwsIotRegistry::new(region).await);
        orchestrator = orchestrator.with_preclean(registry);
    }

    match orchestrator.run().await? {
        ProvisioningOutcome::AlreadyProvisioned(config) => {
            println!("Device already provisioned as {}", config.thing_name);
        }
        ProvisioningOutcome::Provisioned(config) => {
            println!("\n✓ Device provisioned successfully!");
            println!("  Thing: {}", config.thing_name);
            println!("  Endpoint: {}", config.endpoint);
            println!("  Certificate: {}", config.cert_path.display());
        }
    }

    Ok(())
}

async fn cleanup(region: Option<String>, dry_run: bool, force: bool, thing_type: &str) -> Result<()> {
    let registry = Arc::new(AwsIotRegistry::new(region).await);
    let cleaner = LifecycleCleaner::new(registry, thing_type);

    let mut report = cleaner.scan().await?;
    print_findings(&report);

    if report.is_clean() {
        println!("\n✓ Nothing to clean.");
        return Ok(());
    }

    if dry_run {
        println!("\nDry run: no changes made.");
        return Ok(());
    }

    if !force && !confirm("\nDelete these resources? [y/N] ").await? {
        println!("Aborted: no changes made.");
        return Ok(());
    }

    cleaner.apply(&mut report).await;
    print_summary(&report);

    Ok(())
}

async fn show(config: &DeviceClientConfig) -> Result<()> {
    let store = CredentialStore::new(config);

    match store.load_config().await? {
        Some(provisioned) => {
            println!("\nProvisioning Config ({}):", store.config_path().display());
            println!("  Thing: {}", provisioned.thing_name);
            println!("  Endpoint: {}", provisioned.endpoint);
            println!("  Certificate: {}", provisioned.cert_path.display());
            println!("  Private key: {}", provisioned.key_path.display());
            println!("  Root CA: {}", provisioned.ca_path.display());
            if !provisioned.is_well_formed() {
                println!("\n  Config is incomplete; the next 'provision' run will replace it.");
            }
        }
        None => {
            println!("\nDevice is not provisioned.");
            println!("Run 'edge-provision provision' to provision this device.");
        }
    }

    Ok(())
}

fn print_findings(report: &CleanupReport) {
    println!("\nOrphaned things ({}):", report.orphaned_things.len());
    for name in &report.orphaned_things {
        println!("  - {}", name);
    }

    println!("\nOrphaned certificates ({}):", report.orphaned_certificates.len());
    for cert in &report.orphaned_certificates {
        println!("  - {} ({})", cert.short_id(), cert.status);
    }

    println!("\nInactive certificates ({}):", report.inactive_certificates.len());
    for cert in &report.inactive_certificates {
        println!("  - {}", cert.short_id());
    }

    for failure in &report.failures {
        println!("\n  ! could not inspect {}", failure);
    }
}

fn print_summary(report: &CleanupReport) {
    println!("\nDeleted {} things:", report.deleted_things.len());
    for name in &report.deleted_things {
        println!("  - {}", name);
    }

    println!("Deleted {} certificates:", report.deleted_certificates.len());
    for id in &report.deleted_certificates {
        println!("  - {}", id);
    }

    if report.failures.is_empty() {
        println!("\n✓ Cleanup complete.");
    } else {
        println!("\n{} steps need manual attention:", report.failures.len());
        for failure in &report.failures {
            println!("  ! {}", failure);
        }
    }
}

async fn confirm(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    std::io::stdout().flush()?;

    let answer = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await??;

    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
