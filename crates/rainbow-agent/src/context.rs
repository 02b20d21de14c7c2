use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::warn;

use rainbow_channels::OutboundMessenger;
use rainbow_classifier::TieredClassifier;
use rainbow_conversations::ConversationStore;
use rainbow_core::{AdminAlert, ConfigStore, RainbowConfig};
use rainbow_knowledge::KnowledgeRetriever;
use rainbow_providers::ProviderDirectory;
use rainbow_scheduler::SchedulerHandle;
use rainbow_workflows::{EffectRegistry, WorkflowError, WorkflowExecutor, WorkflowSet};

use crate::replies::ReplyBook;
use crate::settings::{RoutingTable, Settings, StaticReplies};

/// Shared subsystem handles for the turn pipeline. One per process,
/// wrapped in `Arc` and handed to every worker.
pub struct AgentContext {
    pub config: RainbowConfig,
    pub config_store: Arc<ConfigStore>,
    pub store: Arc<ConversationStore>,
    pub providers: Arc<ProviderDirectory>,
    pub classifier: TieredClassifier,
    /// Swapped wholesale on workflow config reload; turns clone the Arc.
    workflows: RwLock<Arc<WorkflowExecutor>>,
    pub knowledge: Arc<KnowledgeRetriever>,
    pub scheduler: Arc<SchedulerHandle>,
    pub effects: Arc<EffectRegistry>,
    pub messenger: Arc<dyn OutboundMessenger>,
    pub alert_tx: mpsc::Sender<AdminAlert>,
}

impl AgentContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RainbowConfig,
        config_store: Arc<ConfigStore>,
        store: Arc<ConversationStore>,
        providers: Arc<ProviderDirectory>,
        classifier: TieredClassifier,
        workflows: WorkflowExecutor,
        knowledge: Arc<KnowledgeRetriever>,
        scheduler: Arc<SchedulerHandle>,
        effects: Arc<EffectRegistry>,
        messenger: Arc<dyn OutboundMessenger>,
        alert_tx: mpsc::Sender<AdminAlert>,
    ) -> Self {
        Self {
            config,
            config_store,
            store,
            providers,
            classifier,
            workflows: RwLock::new(Arc::new(workflows)),
            knowledge,
            scheduler,
            effects,
            messenger,
            alert_tx,
        }
    }

    pub fn executor(&self) -> Arc<WorkflowExecutor> {
        self.workflows.read().unwrap().clone()
    }

    /// Rebuild the executor from `workflows.json` after a config reload.
    /// Validation failure keeps the previous executor in place.
    pub fn reload_workflows(&self) -> Result<(), WorkflowError> {
        let set: WorkflowSet = self
            .config_store
            .load("workflows.json")
            .map_err(|e| WorkflowError::InvalidDefinition {
                workflow: "workflows.json".to_string(),
                reason: e.to_string(),
            })?;
        let executor = WorkflowExecutor::from_set(set)?;
        *self.workflows.write().unwrap() = Arc::new(executor);
        Ok(())
    }

    /// Current `settings.json`, defaulting (with a log line) on error so a
    /// broken document degrades rather than drops messages.
    pub fn settings(&self) -> Settings {
        self.config_store.load("settings.json").unwrap_or_else(|e| {
            warn!(error = %e, "settings.json unreadable, using defaults");
            Settings::default()
        })
    }

    pub fn routing(&self) -> RoutingTable {
        self.config_store.load("routing.json").unwrap_or_else(|e| {
            warn!(error = %e, "routing.json unreadable, using defaults");
            RoutingTable::default()
        })
    }

    pub fn replies(&self) -> ReplyBook {
        let doc: StaticReplies = self.config_store.load("knowledge.json").unwrap_or_else(|e| {
            warn!(error = %e, "knowledge.json unreadable, using built-ins");
            StaticReplies::default()
        });
        ReplyBook::from_doc(doc)
    }

    /// Post an operational alert. A single delivery loop in the gateway
    /// fans alerts out to the configured staff phones; posting here never
    /// blocks or fails a guest turn.
    pub async fn raise_alert(&self, alert: AdminAlert) {
        if self.alert_tx.send(alert).await.is_err() {
            warn!("admin alert channel closed, alert dropped");
        }
    }
}
