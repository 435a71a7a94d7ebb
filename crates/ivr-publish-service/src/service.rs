//! Flow service and publish orchestration
//!
//! Publishing runs validate, compile, deploy, connect and reload in that
//! order for one flow. The first fatal failure stops the pipeline, leaves
//! the flow's status untouched and is reported both to the caller and on
//! the event bus. A failed reload is only a warning: the deployed file is
//! correct and the switch picks it up on its next reload.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ivr_engine::compiler::file_name_for;
use ivr_engine::{
    compile_flow, stamp_published, validate_flow, CompilerOptions, EngineError, EventBus, Flow,
    FlowPatch, FlowStatus, FlowStore, FlowSummary, NewFlow, PublishEvent, ValidationError,
};
use manager_protocol::ManagerClient;
use tokio::sync::{Mutex, RwLock};

use crate::audit::AuditLogSink;
use crate::config::{DeployMode, ServiceConfig};
use crate::deploy::{ConfigPublisher, LocalPublisher, PrivilegedPublisher};
use crate::error::{Result, ServiceError};

/// Live control of the switch
#[async_trait]
pub trait SwitchControl: Send + Sync {
    /// Make sure an authenticated session is open
    async fn ensure_connected(&self) -> manager_protocol::Result<()>;

    /// Ask the switch to re-read its dialplan
    async fn reload(&self) -> manager_protocol::Result<()>;
}

#[async_trait]
impl SwitchControl for ManagerClient {
    async fn ensure_connected(&self) -> manager_protocol::Result<()> {
        ManagerClient::ensure_connected(self).await
    }

    async fn reload(&self) -> manager_protocol::Result<()> {
        self.reload_dialplan().await
    }
}

/// Result of a successful publish
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    /// The flow as stored after publishing
    pub flow: Flow,
    /// Where the dialplan was deployed
    pub path: PathBuf,
    /// Set when the reload action failed
    pub warning: Option<String>,
}

/// Flow CRUD plus the publish pipeline
pub struct FlowService {
    store: RwLock<FlowStore>,
    publisher: Arc<dyn ConfigPublisher>,
    switch: Arc<dyn SwitchControl>,
    events: EventBus,
    compiler: CompilerOptions,
    /// Held for a whole publish so only one reload is ever in flight
    publish_lock: Mutex<()>,
}

impl FlowService {
    pub fn new(
        store: FlowStore,
        publisher: Arc<dyn ConfigPublisher>,
        switch: Arc<dyn SwitchControl>,
        events: EventBus,
    ) -> Self {
        Self {
            store: RwLock::new(store),
            publisher,
            switch,
            events,
            compiler: CompilerOptions::default(),
            publish_lock: Mutex::new(()),
        }
    }

    pub fn with_compiler_options(mut self, options: CompilerOptions) -> Self {
        self.compiler = options;
        self
    }

    /// Build the service described by a configuration file.
    ///
    /// Loads persisted flows, picks the publisher for the deploy mode and
    /// attaches the audit log to `events` if one is configured.
    pub fn from_config(config: &ServiceConfig, events: EventBus) -> Result<Self> {
        let mut store = match &config.store_dir {
            Some(dir) => FlowStore::with_persistence(dir),
            None => FlowStore::new(),
        };
        let loaded = store.load_from_disk()?;
        if loaded > 0 {
            log::info!("Loaded {} flow(s)", loaded);
        }

        let publisher: Arc<dyn ConfigPublisher> = match config.deploy.mode {
            DeployMode::Privileged => Arc::new(PrivilegedPublisher::from_config(&config.deploy)),
            DeployMode::Local => Arc::new(
                LocalPublisher::new(config.deploy.dialplan_dir.clone())
                    .with_file_mode(config.deploy.file_mode)
                    .with_timeout(Duration::from_secs(config.deploy.command_timeout_secs)),
            ),
        };

        if let Some(path) = &config.audit_log {
            events.attach(Arc::new(AuditLogSink::open(path)?));
        }

        let switch = Arc::new(ManagerClient::new(config.manager.clone()));
        Ok(Self::new(store, publisher, switch, events).with_compiler_options(config.compiler.clone()))
    }

    /// The bus publish events are sent on
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn create_flow(&self, new_flow: NewFlow) -> Result<Flow> {
        Ok(self.store.write().await.create(new_flow)?)
    }

    /// Store a flow under its own ID, replacing any existing one
    pub async fn import_flow(&self, flow: Flow) -> Result<()> {
        Ok(self.store.write().await.save(flow)?)
    }

    pub async fn get_flow(&self, id: &str) -> Result<Flow> {
        self.store
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(id).into())
    }

    /// Flows created by `owner_id`, most recently updated first
    pub async fn list_flows(&self, owner_id: &str) -> Vec<FlowSummary> {
        self.store.read().await.list_by_owner(owner_id)
    }

    /// Edit a flow. The status is left alone; republish to deploy edits.
    pub async fn update_flow(&self, id: &str, patch: FlowPatch) -> Result<Flow> {
        Ok(self.store.write().await.update(id, patch)?)
    }

    /// Delete a flow owned by `owner_id`.
    ///
    /// A published flow's dialplan file is removed first, then the switch is
    /// asked to reload. The reload is best effort.
    pub async fn delete_flow(&self, id: &str, owner_id: &str) -> Result<Flow> {
        let _publishing = self.publish_lock.lock().await;

        let flow = self.get_flow(id).await?;
        if flow.created_by != owner_id {
            return Err(EngineError::Forbidden {
                flow_id: id.to_string(),
                owner: flow.created_by,
                requester: owner_id.to_string(),
            }
            .into());
        }

        if flow.is_published() {
            self.publisher.remove(&file_name_for(id)).await?;
            if let Err(e) = self.reload_switch().await {
                log::warn!("Reload after deleting flow '{}' failed: {}", id, e);
            }
        }

        let removed = self.store.write().await.delete(id, owner_id)?;
        log::info!("Deleted flow '{}'", id);
        Ok(removed)
    }

    /// Validate a stored flow without publishing it
    pub async fn validate_flow_by_id(&self, id: &str) -> Result<Vec<ValidationError>> {
        let flow = self.get_flow(id).await?;
        Ok(validate_flow(&flow))
    }

    /// Publish a flow to the switch.
    ///
    /// Concurrent calls queue behind each other. Every call emits exactly one
    /// `ivr:published` event.
    pub async fn publish_flow(&self, id: &str) -> Result<PublishOutcome> {
        let _publishing = self.publish_lock.lock().await;
        log::info!("Publishing flow '{}'", id);

        match self.run_publish(id).await {
            Ok(outcome) => {
                log::info!(
                    "Published flow '{}' (version {}) to {:?}",
                    id,
                    outcome.flow.published_version(),
                    outcome.path
                );
                self.events
                    .publish(PublishEvent::success(id, outcome.warning.clone()));
                Ok(outcome)
            }
            Err(e) => {
                let stage = e.stage();
                log::warn!("Publishing flow '{}' failed at {}: {}", id, stage, e);
                self.events
                    .publish(PublishEvent::failure(id, stage, e.to_string()));
                Err(e)
            }
        }
    }

    async fn run_publish(&self, id: &str) -> Result<PublishOutcome> {
        let flow = self.get_flow(id).await?;

        let violations = validate_flow(&flow);
        if !violations.is_empty() {
            return Err(ServiceError::Validation(violations));
        }

        let compiled = compile_flow(&flow, &self.compiler)?;
        let path = self.publisher.publish(&compiled).await?;

        self.switch.ensure_connected().await?;
        let warning = match self.switch.reload().await {
            Ok(()) => None,
            Err(e) => {
                log::warn!("Dialplan reload after publishing '{}' failed: {}", id, e);
                Some(format!("Dialplan reload failed: {}", e))
            }
        };

        // Stamp the latest stored copy so edits made meanwhile survive.
        let mut store = self.store.write().await;
        let mut flow = store.get(id).cloned().ok_or_else(|| EngineError::not_found(id))?;
        flow.status = FlowStatus::Published;
        stamp_published(&mut flow, Utc::now());
        store.save(flow.clone())?;

        Ok(PublishOutcome {
            flow,
            path,
            warning,
        })
    }

    async fn reload_switch(&self) -> manager_protocol::Result<()> {
        self.switch.ensure_connected().await?;
        self.switch.reload().await
    }
}
