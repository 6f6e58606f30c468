//! capz controller manager - reconciles Azure infrastructure for Cluster API

mod config;
mod controller_runner;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};

use capz_aso::WatchRegistry;
use capz_common::crd::all_crds;
use capz_common::leader_election::LeaderElector;
use capz_common::retry::{retry_with_backoff, RetryConfig};
use capz_common::telemetry::init_telemetry;
use capz_common::FIELD_MANAGER;
use capz_controllers::Context;

use config::OperatorConfig;

/// Attempts at installing CRDs before startup fails
const CRD_INSTALL_ATTEMPTS: u32 = 5;

/// Cluster API infrastructure provider for Azure
#[derive(Parser, Debug)]
#[command(name = "capz-controller-manager", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: OperatorConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers (default mode)
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        println!("{}", crd_manifests()?);
        return Ok(());
    }

    init_telemetry(cli.config.telemetry())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.config).await,
    }
}

/// All CRDs as one multi-document YAML stream
fn crd_manifests() -> anyhow::Result<String> {
    let docs = all_crds()
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
    Ok(docs.join("---\n"))
}

/// Install the operator's CRDs with server-side apply
///
/// The operator owns its CRDs, so their versions always match the binary.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in all_crds() {
        let name = crd.name_any();
        let patch = Patch::Apply(&crd);
        tracing::info!(crd = %name, "Installing CRD...");
        retry_with_backoff(
            &RetryConfig::with_max_attempts(CRD_INSTALL_ATTEMPTS),
            &format!("install CRD {name}"),
            || crds.patch(&name, &params, &patch),
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to install {} CRD: {}", name, e))?;
    }

    tracing::info!("All CRDs installed/updated");
    Ok(())
}

/// Run in controller mode
///
/// With leader election on, controllers start once the lease is held and the
/// process exits when it is lost.
async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    tracing::info!("capz controller manager starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    let mut guard = if config.leader_elect {
        let elector = Arc::new(LeaderElector::new(
            client.clone(),
            &config.lease_name,
            &config.leader_election_namespace,
            &config.identity(),
        ));
        Some(elector.acquire().await)
    } else {
        tracing::warn!("Leader election disabled, running controllers unconditionally");
        None
    };

    let namespace = config.watch_namespace.as_deref();
    if let Some(ns) = namespace {
        tracing::info!(namespace = %ns, "Watching a single namespace");
    }

    let registry = WatchRegistry::new(client.clone(), config.watch_namespace.clone());
    let ctx = Arc::new(
        Context::builder(client.clone())
            .watcher(registry.clone())
            .zone_resolver(Arc::new(config.zone_resolver()))
            .pod_name(config.pod_name.clone())
            .reconcile_timeout(config.reconcile_timeout())
            .requeue_after(config.requeue_after())
            .sync_period(config.sync_period())
            .build(),
    );

    tracing::info!("Starting controllers:");
    let controllers = futures::future::join_all(controller_runner::build_controllers(
        client, ctx, registry, namespace,
    ));

    match guard.as_mut() {
        Some(leader) => {
            tokio::select! {
                _ = controllers => {
                    tracing::info!("Controllers completed");
                }
                _ = leader.lost() => {
                    tracing::error!("Leadership lost, shutting down");
                    return Err(anyhow::anyhow!("leader lease lost"));
                }
            }
            if let Err(e) = leader.release_leadership().await {
                tracing::warn!(error = %e, "Failed to release leader lease");
            }
        }
        None => {
            controllers.await;
        }
    }

    tracing::info!("capz controller manager shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: `--crd` output is one YAML document per CRD.
    #[test]
    fn story_crd_manifests_are_separate_documents() {
        let yaml = crd_manifests().unwrap();

        let docs: Vec<_> = yaml.split("---\n").collect();
        assert_eq!(docs.len(), all_crds().len());
        assert!(docs
            .iter()
            .all(|d| d.contains("group: infrastructure.cluster.x-k8s.io")));
    }

    /// Story: Running with no subcommand means controller mode.
    #[test]
    fn story_controller_is_default_mode() {
        let cli = Cli::try_parse_from(["capz-controller-manager"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.crd);

        let cli = Cli::try_parse_from(["capz-controller-manager", "--crd"]).unwrap();
        assert!(cli.crd);
    }
}
