use std::path::PathBuf;

use acme_dns_renew::aws::{build_runtime, load_sdk_config};
use acme_dns_renew::issuance::acme::AcmeAuthority;
use acme_dns_renew::issuance::dns_providers::{DohResolver, Route53Provider};
use acme_dns_renew::issuance::retry::Cancellation;
use acme_dns_renew::storage::{ArtifactStore, S3ObjectStore};
use acme_dns_renew::{CertificateLifecycle, Collaborators, Config, load_config};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

/// Issues and renews certificates over DNS-01, publishing proofs in Route 53 and storing
/// keys and certificates in S3.
#[derive(Parser)]
#[command(name = "acme-dns-renew", version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, short, default_value = "acme-dns-renew.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Issue a certificate, or renew the stored one when it is close to expiry
    Renew,
    /// Revoke the stored certificate
    Revoke,
}

fn init_logging(config: &Config) {
    let default_level = config.log_level.as_deref().unwrap_or("info");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    init_logging(&config);

    let runtime = build_runtime()?;
    let cancel = match config.deadline {
        Some(deadline) => Cancellation::with_timeout(runtime.clone(), deadline),
        None => Cancellation::new(runtime.clone()),
    };
    let s3_sdk = load_sdk_config(&runtime, &config.s3.aws, config.request_timeout);
    let route53_sdk = load_sdk_config(&runtime, &config.route53.aws, config.request_timeout);

    let object_store = S3ObjectStore::new(&s3_sdk, config.s3.bucket.clone(), cancel.clone());
    let zone_provider = Route53Provider::new(&route53_sdk, cancel.clone());
    let resolver = DohResolver::default();
    let authority = AcmeAuthority::new(
        config.directory_url.clone(),
        config.request_timeout,
        cancel.clone(),
    );

    let lifecycle = CertificateLifecycle::new(
        &config,
        Collaborators {
            authority: &authority,
            store: ArtifactStore::new(&object_store, config.s3.names.clone()),
            zone_provider: &zone_provider,
            resolver: &resolver,
        },
        cancel,
    );

    let output = match cli.command.unwrap_or(Command::Renew) {
        Command::Renew => {
            info!("[main] create or renew for {}", config.identifiers.join(", "));
            serde_json::to_string(&lifecycle.create_or_renew()?)?
        }
        Command::Revoke => {
            info!("[main] revoke certificate for {}", config.common_name);
            serde_json::to_string(&lifecycle.revoke()?)?
        }
    };
    println!("{output}");
    Ok(())
}
