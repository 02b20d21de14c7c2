//! Process wiring: subsystems, background loops, effect registry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use rainbow_agent::{AgentContext, Settings};
use rainbow_channels::{ChannelManager, HttpMessenger, MemoryMessenger, OutboundMessenger};
use rainbow_classifier::TieredClassifier;
use rainbow_conversations::ConversationStore;
use rainbow_core::{AdminAlert, ConfigStore, PhoneKey, RainbowConfig};
use rainbow_knowledge::{KnowledgeRetriever, TopicStore};
use rainbow_providers::{
    AnthropicProvider, BreakerConfig, CircuitBreaker, EmbeddingProvider, OllamaProvider,
    OpenAiEmbeddings, OpenAiProvider, ProviderDescriptor, ProviderDirectory, ProviderKind,
    RetryPolicy,
};
use rainbow_scheduler::{RepeatRule, SchedulerEngine, SchedulerHandle};
use rainbow_workflows::{
    EffectCall, EffectRegistry, SideEffect, WorkflowError, WorkflowExecutor, WorkflowSet,
};

use crate::app::AppState;

pub struct Runtime {
    pub state: Arc<AppState>,
    pub shutdown: watch::Sender<bool>,
}

/// Build every subsystem from config and spawn the long-lived loops.
///
/// Startup is strict: a corrupt config document aborts here instead of
/// serving guests with half a brain.
pub async fn build(config: RainbowConfig) -> anyhow::Result<Runtime> {
    let config_store = Arc::new(ConfigStore::open(&config.paths.config_dir)?);

    // Parse every document once up front — corrupt config refuses startup.
    let settings: Settings = config_store.load("settings.json")?;
    let _routing: rainbow_agent::RoutingTable = config_store.load("routing.json")?;
    let workflow_set: WorkflowSet = config_store.load("workflows.json")?;

    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(ConversationStore::new(rusqlite::Connection::open(
        &config.database.path,
    )?)?);
    let scheduler = Arc::new(SchedulerHandle::new(rusqlite::Connection::open(
        &config.database.path,
    )?)?);

    let providers = Arc::new(build_providers(&config, &settings));
    if providers.is_empty() {
        warn!("no LLM providers configured — T4 and LLM replies will fall back to static text");
    }

    let embedder = build_embedder(&config);
    let classifier = TieredClassifier::new(providers.clone(), embedder);

    let executor = WorkflowExecutor::from_set(workflow_set)
        .map_err(|e: WorkflowError| anyhow::anyhow!(e.to_string()))?;

    let knowledge = Arc::new(KnowledgeRetriever::new(TopicStore::new(
        &config.paths.knowledge_dir,
    )));

    let mut channels = ChannelManager::new();
    match &config.transport {
        Some(t) => channels.register(Arc::new(HttpMessenger::new(
            t.base_url.clone(),
            t.api_key.clone(),
        ))),
        None => {
            warn!("no transport configured, outbound messages are recorded in memory only");
            channels.register(MemoryMessenger::new());
        }
    }
    let messenger: Arc<dyn OutboundMessenger> = channels
        .default_channel()
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let (alert_tx, alert_rx) = mpsc::channel::<AdminAlert>(64);

    let effects = build_effects(alert_tx.clone(), scheduler.clone());

    let ctx = Arc::new(AgentContext::new(
        config.clone(),
        config_store.clone(),
        store,
        providers,
        classifier,
        executor,
        knowledge,
        scheduler.clone(),
        effects,
        messenger.clone(),
        alert_tx,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Scheduler engine: durable scheduled sends.
    let engine = SchedulerEngine::new(&scheduler, messenger.clone(), Some(ctx.alert_tx.clone()));
    tokio::spawn(engine.run(shutdown_rx.clone()));

    // Workflow idle-timeout sweeper.
    tokio::spawn(rainbow_agent::sweeper::run_workflow_timeout_sweeper(
        ctx.clone(),
        shutdown_rx.clone(),
    ));

    // Knowledge reload probe — drives the health flag and degraded mode.
    tokio::spawn(knowledge_reload_loop(ctx.clone(), shutdown_rx.clone()));

    // Config hot reload: re-validate workflows on every document swap.
    tokio::spawn(config_reload_loop(ctx.clone(), shutdown_rx.clone()));

    // Admin alert delivery to staff phones.
    tokio::spawn(alert_delivery_loop(
        ctx.clone(),
        messenger,
        alert_rx,
        shutdown_rx,
    ));

    Ok(Runtime {
        state: AppState::new(ctx),
        shutdown: shutdown_tx,
    })
}

/// Register provider adapters for every enabled descriptor in settings.
/// Credentials come from the TOML config; which providers run, and in what
/// order, comes from `settings.json`. With no descriptors at all, a default
/// priority list is synthesized from whatever credentials exist.
fn build_providers(config: &RainbowConfig, settings: &Settings) -> ProviderDirectory {
    let mut directory = ProviderDirectory::new(
        CircuitBreaker::new(BreakerConfig::default()),
        RetryPolicy::default(),
        Duration::from_secs(30),
    );

    let descriptors: Vec<ProviderDescriptor> = if settings.providers.is_empty() {
        default_descriptors(config)
    } else {
        settings.providers.clone()
    };

    for descriptor in descriptors {
        let endpoint = descriptor.endpoint.clone();
        match descriptor.id.as_str() {
            "anthropic" => {
                if let Some(cfg) = &config.providers.anthropic {
                    directory.register(
                        descriptor,
                        Box::new(AnthropicProvider::new(
                            cfg.api_key.clone(),
                            endpoint.or_else(|| Some(cfg.base_url.clone())),
                        )),
                    );
                } else {
                    warn!("settings list anthropic but no credentials configured");
                }
            }
            "openai" => {
                if let Some(cfg) = &config.providers.openai {
                    directory.register(
                        descriptor,
                        Box::new(OpenAiProvider::new(
                            cfg.api_key.clone(),
                            endpoint.or_else(|| Some(cfg.base_url.clone())),
                        )),
                    );
                } else {
                    warn!("settings list openai but no credentials configured");
                }
            }
            "ollama" => {
                let base = endpoint.or_else(|| {
                    config.providers.ollama.as_ref().map(|c| c.base_url.clone())
                });
                directory.register(descriptor, Box::new(OllamaProvider::new(base)));
            }
            other => {
                // OpenAI-compatible custom endpoint: key rides in the
                // openai credential slot.
                if let (Some(cfg), Some(base)) = (&config.providers.openai, endpoint) {
                    let name = other.to_string();
                    directory.register(
                        descriptor,
                        Box::new(
                            OpenAiProvider::new(cfg.api_key.clone(), Some(base)).with_name(name),
                        ),
                    );
                } else {
                    warn!(provider = other, "unknown provider id without endpoint, skipping");
                }
            }
        }
    }

    directory
}

fn default_descriptors(config: &RainbowConfig) -> Vec<ProviderDescriptor> {
    let mut out = Vec::new();
    let descriptor = |id: &str, kind: ProviderKind, model: &str, priority: u32| {
        ProviderDescriptor {
            id: id.to_string(),
            kind,
            endpoint: None,
            model: model.to_string(),
            enabled: true,
            priority,
            pinned: Default::default(),
            last_health_check: None,
        }
    };
    if config.providers.anthropic.is_some() {
        out.push(descriptor(
            "anthropic",
            ProviderKind::Cloud,
            "claude-sonnet-4-6",
            0,
        ));
    }
    if config.providers.openai.is_some() {
        out.push(descriptor("openai", ProviderKind::Cloud, "gpt-4o-mini", 1));
    }
    if config.providers.ollama.is_some() {
        out.push(descriptor("ollama", ProviderKind::Local, "llama3.1", 2));
    }
    out
}

fn build_embedder(config: &RainbowConfig) -> Option<Arc<dyn EmbeddingProvider>> {
    config.providers.embeddings.as_ref().map(|cfg| {
        Arc::new(OpenAiEmbeddings::new(
            cfg.api_key.clone(),
            Some(cfg.base_url.clone()),
            cfg.model.clone(),
        )) as Arc<dyn EmbeddingProvider>
    })
}

// ── Side effects ─────────────────────────────────────────────────────────

/// Posts a staff alert carrying the workflow's collected slots.
struct NotifyStaff {
    alert_tx: mpsc::Sender<AdminAlert>,
}

#[async_trait]
impl SideEffect for NotifyStaff {
    fn name(&self) -> &str {
        "notify_staff"
    }

    async fn run(&self, call: &EffectCall) -> Result<(), WorkflowError> {
        let slots: Vec<String> = call
            .slots
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        let alert = AdminAlert::new(
            "workflow_notification",
            format!(
                "Workflow {} ({}) for {}: {}",
                call.workflow_id,
                call.step_id,
                call.phone,
                slots.join(", ")
            ),
        );
        self.alert_tx
            .send(alert)
            .await
            .map_err(|e| WorkflowError::EffectFailed {
                name: "notify_staff".to_string(),
                reason: e.to_string(),
            })
    }
}

/// Schedules a next-day follow-up message for the guest.
struct ScheduleFollowup {
    scheduler: Arc<SchedulerHandle>,
}

#[async_trait]
impl SideEffect for ScheduleFollowup {
    fn name(&self) -> &str {
        "schedule_followup"
    }

    async fn run(&self, call: &EffectCall) -> Result<(), WorkflowError> {
        let phone = PhoneKey::parse(&call.phone).map_err(|e| WorkflowError::EffectFailed {
            name: "schedule_followup".to_string(),
            reason: e.to_string(),
        })?;
        self.scheduler
            .schedule(
                &phone,
                "Just checking in — was everything alright with your request?",
                chrono::Utc::now() + chrono::Duration::hours(24),
                RepeatRule::None,
                "workflow",
            )
            .map_err(|e| WorkflowError::EffectFailed {
                name: "schedule_followup".to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

fn build_effects(
    alert_tx: mpsc::Sender<AdminAlert>,
    scheduler: Arc<SchedulerHandle>,
) -> Arc<EffectRegistry> {
    let mut registry = EffectRegistry::new();
    registry.register(Arc::new(NotifyStaff { alert_tx }));
    registry.register(Arc::new(ScheduleFollowup { scheduler }));
    Arc::new(registry)
}

// ── Background loops ─────────────────────────────────────────────────────

async fn knowledge_reload_loop(ctx: Arc<AgentContext>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(Duration::from_secs(300));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Some(alert) = ctx.knowledge.reload() {
                    ctx.raise_alert(alert).await;
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn config_reload_loop(ctx: Arc<AgentContext>, mut shutdown: watch::Receiver<bool>) {
    let mut reload_rx = ctx.config_store.subscribe();
    loop {
        tokio::select! {
            changed = reload_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                match ctx.reload_workflows() {
                    Ok(()) => info!("workflow definitions reloaded"),
                    Err(e) => error!(error = %e, "workflow reload rejected, keeping previous set"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn alert_delivery_loop(
    ctx: Arc<AgentContext>,
    messenger: Arc<dyn OutboundMessenger>,
    mut alert_rx: mpsc::Receiver<AdminAlert>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            alert = alert_rx.recv() => {
                let Some(alert) = alert else { break };
                error!(code = %alert.code, message = %alert.message, "admin alert");
                let staff = ctx.settings().staff_phones;
                for raw in &staff {
                    match PhoneKey::parse(raw) {
                        Ok(phone) => {
                            if let Err(e) = messenger
                                .send(&phone, &format!("[rainbow alert] {}", alert.message))
                                .await
                            {
                                warn!(staff = raw.as_str(), error = %e, "staff alert send failed");
                            }
                        }
                        Err(e) => warn!(staff = raw.as_str(), error = %e, "bad staff phone"),
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
