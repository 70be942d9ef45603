//! Service wiring for the `run` and `status` commands.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, bail};
use tokio::sync::broadcast;
use tracing::{info, warn};

use approvalflow_config::{Config, ConfigLoader, StorageBackend};
use approvalflow_core::{Collaborators, WorkflowEngine, validation::validate_with_directory};
use approvalflow_events::{CascadeHandler, EventBus, EventSubscriber};
use approvalflow_monitor::{NotificationDispatcher, SessionChannel, SessionRegistry, TimeoutMonitor};
use approvalflow_protocols::{InstanceStore, TaskStore, Topic};
use approvalflow_store::{DefinitionRegistry, FileStore, MemoryStore, StaticUserDirectory};

/// Every long-lived service of a running engine.
pub(crate) struct App {
    pub engine: Arc<WorkflowEngine>,
    pub bus: Arc<EventBus>,
    pub monitor: Arc<TimeoutMonitor>,
    pub sessions: Arc<SessionRegistry>,
    pub registry: Arc<DefinitionRegistry>,
}

async fn open_stores(config: &Config) -> anyhow::Result<(Arc<dyn TaskStore>, Arc<dyn InstanceStore>)> {
    match config.storage.backend {
        StorageBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            let tasks: Arc<dyn TaskStore> = store.clone();
            let instances: Arc<dyn InstanceStore> = store;
            Ok((tasks, instances))
        }
        StorageBackend::File => {
            let path = ConfigLoader::expand_path(&config.storage.path.to_string_lossy());
            let store = Arc::new(
                FileStore::new(&path)
                    .await
                    .with_context(|| format!("failed to open file store at {}", path))?,
            );
            info!("Using file store at {}", path);
            let tasks: Arc<dyn TaskStore> = store.clone();
            let instances: Arc<dyn InstanceStore> = store;
            Ok((tasks, instances))
        }
    }
}

impl App {
    /// Build the services described by `config`. Definitions are resolved
    /// relative to `base_dir`.
    pub async fn build(config: &Config, base_dir: &Path) -> anyhow::Result<Self> {
        let definitions =
            ConfigLoader::load_definitions(config, base_dir).context("failed to load workflow definitions")?;
        let directory = Arc::new(StaticUserDirectory::from_config(&config.users));

        for definition in &definitions {
            let report = validate_with_directory(definition, directory.as_ref())
                .await
                .with_context(|| format!("invalid workflow '{}'", definition.name))?;
            for warning in &report.warnings {
                warn!("{}", warning);
            }
        }
        let registry = Arc::new(DefinitionRegistry::from_definitions(definitions));

        let (tasks, instances) = open_stores(config).await?;
        let bus = Arc::new(EventBus::new(&config.events));
        let sessions = Arc::new(SessionRegistry::new());
        let dispatcher =
            NotificationDispatcher::new().with_channel(Box::new(SessionChannel::new(sessions.clone())));

        let engine = Arc::new(WorkflowEngine::new(
            config.engine.clone(),
            Collaborators {
                definitions: registry.clone(),
                directory,
                tasks,
                instances: instances.clone(),
                publisher: bus.clone(),
                notifier: Arc::new(dispatcher),
            },
        ));
        let monitor = Arc::new(TimeoutMonitor::new(engine.clone(), registry.clone(), instances));

        Ok(Self {
            engine,
            bus,
            monitor,
            sessions,
            registry,
        })
    }
}

/// Run until Ctrl-C.
pub(crate) async fn run(config: Config, base_dir: &Path) -> anyhow::Result<()> {
    info!("Starting ApprovalFlow v{}", env!("CARGO_PKG_VERSION"));
    let app = App::build(&config, base_dir).await?;
    info!(
        "Loaded {} workflows and {} users",
        app.registry.len(),
        config.users.len()
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let subscriber = EventSubscriber::new(
        app.bus.subscribe(Topic::TaskEvents),
        Arc::new(CascadeHandler::new(&app.engine)),
        &config.events,
    );
    let stats = subscriber.stats();
    let subscriber_task = tokio::spawn(subscriber.run(shutdown_tx.subscribe()));

    app.monitor.start_with(&config.monitor);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutdown requested");

    app.monitor.stop();
    let _ = shutdown_tx.send(());
    if tokio::time::timeout(Duration::from_secs(5), subscriber_task).await.is_err() {
        warn!("Event subscriber did not stop within 5s");
    }

    let dead_letters = stats.dead_letters();
    if !dead_letters.is_empty() {
        warn!("{} events were dead-lettered during this run", dead_letters.len());
    }
    info!(
        "ApprovalFlow stopped ({} events processed, {} sessions open)",
        stats.processed(),
        app.sessions.len()
    );
    Ok(())
}

/// Print the status of one instance from the file store.
pub(crate) async fn status(config: Config, base_dir: &Path, instance_id: uuid::Uuid) -> anyhow::Result<()> {
    if config.storage.backend != StorageBackend::File {
        bail!("`status` needs `storage.backend = \"file\"`; the memory store is empty in a new process");
    }
    let app = App::build(&config, base_dir).await?;
    let report = app
        .engine
        .get_workflow_status(instance_id)
        .await
        .with_context(|| format!("no status for instance {}", instance_id))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
