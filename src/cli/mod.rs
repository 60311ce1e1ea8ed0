//! The companion CLI: `apply`/`delete`/`list`/`status` subcommands wrapping the engine,
//! plus the reference driver loop. The engine and its components are library-only; this
//! module is a thin, informative wrapper rather than load-bearing logic.

pub mod config;
pub mod driver;
pub mod file_generator;

use crate::api_bridge::ApiBridge;
use crate::config::ReconcilerConfig;
use crate::engine::Engine;
use crate::generator::GeneratorContext;
use crate::normalizer::ObjectNormalizer;
use crate::release_store::ReleaseStore;
use crate::status::BuiltInStatusAnalyzer;
use clap::{Parser, Subcommand};
use config::FileConfig;
use file_generator::FileGenerator;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::instrument;

#[derive(Parser, Debug)]
#[command(name = "component-reconciler", about = "Install, update and delete Kubernetes components")]
pub struct Cli {
    #[arg(long, default_value = "component-reconciler.yaml")]
    pub config: PathBuf,

    #[arg(long)]
    pub reconciler_name: Option<String>,

    #[arg(long, default_value = "./manifests")]
    pub manifest_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply a component until it converges, retrying transient failures.
    Apply {
        component: String,
        #[arg(long, default_value = "")]
        revision: String,
    },
    /// Delete every object a component owns.
    Delete { component: String },
    /// List the persisted inventory for a component.
    List { component: String },
    /// Print the status verdict for every object in a component's inventory.
    Status { component: String },
}

pub async fn run(cli: Cli) -> Result<(), crate::error::ReconcileError> {
    let file_config = FileConfig::load(&cli.config).unwrap_or_default();
    let manifest_dir = file_config
        .manifest_dir
        .clone()
        .map(PathBuf::from)
        .unwrap_or(cli.manifest_dir);
    let reconciler_config: ReconcilerConfig =
        file_config.into_reconciler_config(cli.reconciler_name.clone());

    let client = kube::Client::try_default()
        .await
        .map_err(|e| crate::error::ReconcileError::Transient(crate::error::K8sError::Kube(e)))?;

    let engine = build_engine(client, reconciler_config, manifest_dir);

    match cli.command {
        Command::Apply { component, revision } => apply(&engine, component, revision).await,
        Command::Delete { component } => delete(&engine, component).await,
        Command::List { component } => list(&engine, component).await,
        Command::Status { component } => status(&engine, component).await,
    }
}

fn build_engine(client: kube::Client, config: ReconcilerConfig, manifest_dir: PathBuf) -> Engine {
    let bridge = ApiBridge::new(
        client.clone(),
        config.field_owner.clone(),
        config.reconciler_name.clone(),
        config.reclaim_prefixes.clone(),
    );
    let normalizer = ObjectNormalizer::new(client.clone(), config.default_namespace.clone());
    let release_store = ReleaseStore::new(client, config.default_namespace.clone(), config.field_owner.clone());
    let status_analyzer = Arc::new(BuiltInStatusAnalyzer);
    let generator = Arc::new(FileGenerator { manifest_dir });
    Engine::new(config, bridge, normalizer, release_store, status_analyzer, generator)
}

#[instrument(skip(engine))]
async fn apply(engine: &Engine, component: String, revision: String) -> Result<(), crate::error::ReconcileError> {
    driver::run(|| {
        let ctx = GeneratorContext {
            component_name: component.clone(),
            component_revision: revision.clone(),
            namespace: None,
        };
        async {
            let outcome = engine.apply(ctx).await?;
            if outcome.done {
                Ok(driver::DriverStep::Done)
            } else {
                Ok(driver::DriverStep::Continue)
            }
        }
    })
    .await
}

#[instrument(skip(engine))]
async fn delete(engine: &Engine, component: String) -> Result<(), crate::error::ReconcileError> {
    driver::run(|| {
        let component = component.clone();
        async move {
            let outcome = engine.delete(&component).await?;
            if outcome.done {
                Ok(driver::DriverStep::Done)
            } else {
                Ok(driver::DriverStep::Continue)
            }
        }
    })
    .await
}

async fn list(engine: &Engine, component: String) -> Result<(), crate::error::ReconcileError> {
    let inventory = engine
        .release_store
        .load(&component)
        .await
        .map_err(crate::error::ReconcileError::Transient)?;
    for item in inventory.items() {
        println!(
            "{}/{} {}/{}\tphase={:?}\tdigest={}",
            item.key.group, item.key.kind, item.key.namespace, item.key.name, item.phase, item.digest
        );
    }
    Ok(())
}

async fn status(engine: &Engine, component: String) -> Result<(), crate::error::ReconcileError> {
    use crate::status::StatusAnalyzer;
    let inventory = engine
        .release_store
        .load(&component)
        .await
        .map_err(crate::error::ReconcileError::Transient)?;
    for item in inventory.items() {
        let live = engine
            .bridge
            .read(&item.key)
            .await
            .map_err(crate::error::ReconcileError::Transient)?;
        let verdict = match &live {
            Some(obj) => engine.status_analyzer.analyze(obj).await,
            None => crate::status::StatusVerdict::NotFound,
        };
        println!(
            "{}/{} {}/{}\t{:?}",
            item.key.group, item.key.kind, item.key.namespace, item.key.name, verdict
        );
    }
    Ok(())
}
