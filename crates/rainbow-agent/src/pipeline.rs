//! The inbound turn: language → state → workflow → classify → route →
//! retrieve → generate → persist → send.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rainbow_channels::InboundMessage;
use rainbow_classifier::{assess_sentiment, is_cancel_message, ClassifierConfig, Sentiment};
use rainbow_conversations::{summarize::summarize_if_needed, MessageMeta};
use rainbow_core::{Action, AdminAlert, Lang, PhoneKey, RainbowError, ResponseMode, Tier};
use rainbow_knowledge::hardcoded_staff_reply;
use rainbow_language::{detect, resolve_reply_language, should_update_stored, Detection};
use rainbow_providers::{ChatRequest, Message, Role, TaskKind, Usage};
use rainbow_workflows::TurnResult;

use crate::context::AgentContext;
use crate::policy::{route, EscalationReason, PolicyInput};
use crate::replies::ReplyBook;

/// What one processed turn produced — the `/preview/chat` response body is
/// this struct verbatim.
#[derive(Debug, Clone, Serialize)]
pub struct TurnReply {
    pub reply: String,
    pub intent: String,
    pub confidence: f64,
    pub tier: Option<Tier>,
    pub model: Option<String>,
    pub detected_language: Lang,
    pub response_time_ms: u64,
    pub kb_files_used: Vec<String>,
    pub action: String,
    pub usage: Usage,
}

/// Process one inbound message under the per-request deadline.
///
/// On deadline the guest still gets a static fallback reply in the resolved
/// language, and the in-flight provider (if any) takes the breaker hit.
pub async fn process_inbound(
    ctx: &Arc<AgentContext>,
    msg: &InboundMessage,
) -> Result<TurnReply, RainbowError> {
    let deadline = Duration::from_secs(ctx.config.assistant.request_deadline_secs);
    let cancel = CancellationToken::new();

    match tokio::time::timeout(deadline, process_turn(ctx, msg, &cancel)).await {
        Ok(result) => result,
        Err(_) => {
            cancel.cancel();
            deadline_fallback(ctx, msg, deadline).await
        }
    }
}

async fn deadline_fallback(
    ctx: &Arc<AgentContext>,
    msg: &InboundMessage,
    deadline: Duration,
) -> Result<TurnReply, RainbowError> {
    warn!(phone = %msg.phone, deadline_ms = deadline.as_millis() as u64, "turn deadline exceeded");

    let detection = detect(&msg.text);
    let stored = ctx
        .store
        .get(&msg.phone)
        .ok()
        .flatten()
        .map(|c| c.language)
        .unwrap_or(Lang::En);
    let lang = resolve_reply_language(detection, stored);
    let settings = ctx.settings();
    let reply = hardcoded_staff_reply(lang, &settings.staff_phones);

    // The slow call was almost certainly the highest-priority live
    // provider; its breaker takes the failure.
    if let Some(desc) = ctx.providers.descriptors().into_iter().find(|d| d.enabled) {
        ctx.providers.breaker().record_failure(&desc.id);
    }

    let meta = MessageMeta {
        action: Some("deadline_fallback".to_string()),
        ..Default::default()
    };
    let _ = ctx
        .store
        .append_message(&msg.phone, "assistant", &reply, meta);
    let _ = ctx.messenger.send(&msg.phone, &reply).await;

    Ok(TurnReply {
        reply,
        intent: "unknown".to_string(),
        confidence: 0.0,
        tier: None,
        model: None,
        detected_language: detection.lang,
        response_time_ms: deadline.as_millis() as u64,
        kb_files_used: Vec::new(),
        action: "deadline_fallback".to_string(),
        usage: Usage::default(),
    })
}

async fn process_turn(
    ctx: &Arc<AgentContext>,
    msg: &InboundMessage,
    cancel: &CancellationToken,
) -> Result<TurnReply, RainbowError> {
    let started = Instant::now();
    let phone = &msg.phone;
    let now = chrono::Utc::now().to_rfc3339();

    // Language router first — everything downstream needs the detection.
    let detection = detect(&msg.text);

    let conv = ctx
        .store
        .get_or_create(phone)
        .map_err(|e| RainbowError::Database(e.to_string()))?;
    let is_first_contact = conv.message_count == 0;

    if conv.display_name.is_none() {
        if let Some(name) = &msg.push_name {
            let _ = ctx.store.set_display_name(phone, Some(name));
        }
    }

    let reply_lang = resolve_reply_language(detection, conv.language);
    if should_update_stored(detection, conv.language) {
        ctx.store
            .set_language(phone, detection.lang)
            .map_err(|e| RainbowError::Database(e.to_string()))?;
        info!(phone = %phone, lang = %detection.lang, "conversation language updated");
    }

    // Classifier context is the history *before* this turn.
    let prior_history = ctx
        .store
        .history(phone, 10)
        .map_err(|e| RainbowError::Database(e.to_string()))?;

    ctx.store
        .append_message(phone, "user", &msg.text, MessageMeta::default())
        .map_err(|e| RainbowError::Database(e.to_string()))?;

    // Sentiment is an auxiliary single pass, not a tier.
    let negative = assess_sentiment(&msg.text) == Sentiment::Negative;
    let _ = ctx.store.update_sentiment(phone, negative);

    let settings = ctx.settings();
    let replies = ctx.replies();

    // Active workflow consumes the message before any classification.
    if let Some(cursor) = conv.workflow.clone() {
        let result = ctx
            .executor()
            .handle_turn(
                cursor,
                phone.as_str(),
                &msg.text,
                reply_lang,
                is_cancel_message(&msg.text),
                &now,
            )
            .map_err(|e| RainbowError::Workflow {
                workflow: "active".to_string(),
                reason: e.to_string(),
            })?;
        return finish_workflow_turn(ctx, msg, detection, reply_lang, result, started).await;
    }

    // Foreign-language messages are translated to English before
    // classification; the reply language is unaffected.
    let classification_text = maybe_translate(ctx, &msg.text, detection, cancel).await;

    let context_messages = to_provider_messages(&prior_history);
    let routing = ctx.routing();
    let classifier_cfg = ClassifierConfig {
        settings: settings.intent.clone(),
        keywords: ctx.config_store.load("intent-keywords.json").unwrap_or_default(),
        examples: ctx.config_store.load("intent-examples.json").unwrap_or_default(),
        taxonomy: routing.taxonomy(),
    };

    let classification = ctx
        .classifier
        .classify(
            &classification_text,
            detection,
            &context_messages,
            &classifier_cfg,
            Some(cancel),
        )
        .await;

    let _ = ctx.store.log_prediction(
        phone,
        &msg.text,
        &classification.intent,
        classification.confidence,
        classification.tier.unwrap_or(Tier::T4),
        classification.model.as_deref(),
    );

    let recognized = if classification.is_unknown() {
        None
    } else {
        Some((classification.intent.as_str(), classification.confidence))
    };
    let counters = ctx
        .store
        .update_intent_counters(phone, recognized)
        .map_err(|e| RainbowError::Database(e.to_string()))?;

    let copilot = match conv.response_mode {
        Some(ResponseMode::Copilot) => true,
        Some(ResponseMode::Autopilot) => false,
        None => settings.copilot.enabled,
    };

    let decision = route(&PolicyInput {
        intent: &classification.intent,
        confidence: classification.confidence,
        counters: &counters,
        is_first_contact,
        copilot,
        auto_approve_intents: &settings.auto_approve_intents,
        routing: &routing,
        sentiment_cooldown_minutes: ctx.config.assistant.sentiment_cooldown_minutes,
        now: chrono::Utc::now(),
    });

    debug!(
        phone = %phone,
        intent = %classification.intent,
        action = decision.action.label(),
        "turn routed"
    );

    // Act on the decision. Every arm resolves to (reply text, kb topics,
    // usage, model) — the sum type keeps this exhaustive.
    let mut kb_files_used: Vec<String> = Vec::new();
    let mut usage = Usage::default();
    let mut reply_model: Option<String> = None;
    let mut queued_for_review = false;
    let mut workflow_meta: (Option<String>, Option<String>) = (None, None);
    let mut workflow_effects = Vec::new();

    let reply_text = match &decision.action {
        Action::StaticReply => {
            let base = replies
                .reply(&classification.intent, reply_lang)
                .unwrap_or_else(|| ReplyBook::unknown_reply(reply_lang));
            if decision.menu_hint {
                format!("{}\n\n{}", base, ReplyBook::capability_menu(reply_lang))
            } else {
                base
            }
        }

        Action::Escalate => {
            if decision.escalation == Some(EscalationReason::Sentiment) {
                let _ = ctx.store.mark_sentiment_escalation(phone);
            }
            let alert = AdminAlert::new(
                "conversation_escalated",
                format!(
                    "Conversation {} escalated ({})",
                    phone,
                    match decision.escalation {
                        Some(EscalationReason::Emergency) => "emergency intent",
                        Some(EscalationReason::Repeat) => "3rd identical attempt",
                        Some(EscalationReason::Sentiment) => "3 consecutive negative turns",
                        None => "policy",
                    }
                ),
            );
            let ctx_clone = Arc::clone(ctx);
            tokio::spawn(async move { ctx_clone.raise_alert(alert).await });

            match decision.escalation {
                Some(EscalationReason::Emergency) => {
                    let ack = ReplyBook::emergency_ack(reply_lang);
                    // Emergencies with a routed workflow (theft) start it
                    // right behind the urgency acknowledgement so details
                    // are collected while staff are en route.
                    if let Some(Action::Workflow { workflow_id }) =
                        routing.action_for(&classification.intent)
                    {
                        match ctx
                            .executor()
                            .start(workflow_id, phone.as_str(), reply_lang, &now)
                        {
                            Ok(result) => {
                                let _ = ctx.store.set_workflow(phone, result.cursor.as_ref());
                                workflow_meta = (
                                    Some(workflow_id.clone()),
                                    result.cursor.as_ref().map(|c| c.step_id.clone()),
                                );
                                workflow_effects = result.effects;
                                format!("{}\n\n{}", ack, result.reply)
                            }
                            Err(e) => {
                                warn!(workflow = %workflow_id, error = %e, "emergency workflow start failed");
                                ack
                            }
                        }
                    } else {
                        ack
                    }
                }
                Some(EscalationReason::Repeat) => replies
                    .reply(&classification.intent, reply_lang)
                    .unwrap_or_else(|| ReplyBook::escalation_ack(reply_lang)),
                _ => ReplyBook::escalation_ack(reply_lang),
            }
        }

        Action::Workflow { workflow_id } => {
            let result = ctx
                .executor()
                .start(workflow_id, phone.as_str(), reply_lang, &now)
                .map_err(|e| RainbowError::Workflow {
                    workflow: workflow_id.clone(),
                    reason: e.to_string(),
                })?;
            ctx.store
                .set_workflow(phone, result.cursor.as_ref())
                .map_err(|e| RainbowError::Database(e.to_string()))?;
            workflow_meta = (
                Some(workflow_id.clone()),
                result.cursor.as_ref().map(|c| c.step_id.clone()),
            );
            workflow_effects = result.effects;
            result.reply
        }

        Action::LlmReply | Action::StaffReview => {
            let built = ctx.knowledge.build_prompt(&classification.intent, &msg.text);
            kb_files_used = built.topics_used.clone();
            let system = format!(
                "{}\n\nReply in {}. Keep replies short and WhatsApp-friendly.",
                built.text,
                language_name(reply_lang)
            );

            let mut messages = to_provider_messages(&prior_history);
            messages.push(Message::user(msg.text.clone()));
            let req = ChatRequest {
                model: String::new(),
                system,
                messages,
                max_tokens: 1024,
            };

            match ctx.providers.chat(TaskKind::Chat, &req, Some(cancel)).await {
                Ok((reply, _provider)) => {
                    usage = reply.usage;
                    reply_model = Some(reply.model.clone());
                    queued_for_review = matches!(decision.action, Action::StaffReview);
                    reply.content
                }
                Err(e) => {
                    warn!(phone = %phone, error = %e, "llm reply failed, serving static fallback");
                    replies
                        .reply(&classification.intent, reply_lang)
                        .unwrap_or_else(|| {
                            hardcoded_staff_reply(reply_lang, &settings.staff_phones)
                        })
                }
            }
        }
    };

    // Persist the assistant turn with full classification metadata.
    let meta = MessageMeta {
        intent: Some(classification.intent.clone()),
        confidence: Some(classification.confidence),
        tier: classification.tier,
        model: reply_model.clone().or(classification.model.clone()),
        response_ms: Some(started.elapsed().as_millis() as u64),
        kb_topics: kb_files_used.clone(),
        action: Some(decision.action.label().to_string()),
        workflow_id: workflow_meta.0.clone(),
        step_id: workflow_meta.1.clone(),
        tokens_in: usage.prompt_tokens,
        tokens_out: usage.completion_tokens,
        manual: false,
        summary: false,
    };
    ctx.store
        .append_message(phone, "assistant", &reply_text, meta)
        .map_err(|e| RainbowError::Database(e.to_string()))?;

    // Copilot queue: the reply waits for staff approval, nothing is sent.
    if !queued_for_review {
        if let Err(e) = ctx.messenger.send(phone, &reply_text).await {
            warn!(phone = %phone, error = %e, "outbound send failed");
        }
    }

    // Side effects strictly after the reply is queued.
    if !workflow_effects.is_empty() {
        let effects = ctx.effects.clone();
        tokio::spawn(async move { effects.run_all(&workflow_effects).await });
    }

    spawn_summarizer(ctx, phone.clone());

    Ok(TurnReply {
        reply: reply_text,
        intent: classification.intent,
        confidence: classification.confidence,
        tier: classification.tier,
        model: reply_model.or(classification.model),
        detected_language: detection.lang,
        response_time_ms: started.elapsed().as_millis() as u64,
        kb_files_used,
        action: decision.action.label().to_string(),
        usage,
    })
}

/// Finish a turn consumed by an active workflow.
async fn finish_workflow_turn(
    ctx: &Arc<AgentContext>,
    msg: &InboundMessage,
    detection: Detection,
    reply_lang: Lang,
    result: TurnResult,
    started: Instant,
) -> Result<TurnReply, RainbowError> {
    let phone = &msg.phone;
    ctx.store
        .set_workflow(phone, result.cursor.as_ref())
        .map_err(|e| RainbowError::Database(e.to_string()))?;

    let meta = MessageMeta {
        intent: Some("workflow".to_string()),
        confidence: Some(1.0),
        response_ms: Some(started.elapsed().as_millis() as u64),
        action: Some("workflow".to_string()),
        workflow_id: result
            .cursor
            .as_ref()
            .map(|c| c.workflow_id.clone()),
        step_id: result.cursor.as_ref().map(|c| c.step_id.clone()),
        ..Default::default()
    };
    ctx.store
        .append_message(phone, "assistant", &result.reply, meta)
        .map_err(|e| RainbowError::Database(e.to_string()))?;

    if let Err(e) = ctx.messenger.send(phone, &result.reply).await {
        warn!(phone = %phone, error = %e, "outbound send failed");
    }

    if !result.effects.is_empty() {
        let effects = ctx.effects.clone();
        let calls = result.effects;
        tokio::spawn(async move { effects.run_all(&calls).await });
    }

    spawn_summarizer(ctx, phone.clone());

    Ok(TurnReply {
        reply: result.reply,
        intent: "workflow".to_string(),
        confidence: 1.0,
        tier: None,
        model: None,
        detected_language: detection.lang,
        response_time_ms: started.elapsed().as_millis() as u64,
        kb_files_used: Vec::new(),
        action: "workflow".to_string(),
        usage: Usage::default(),
    })
}

/// Translate a message in an unsupported language to English for
/// classification. Best-effort: on any failure the original text stands.
async fn maybe_translate(
    ctx: &Arc<AgentContext>,
    text: &str,
    detection: Detection,
    cancel: &CancellationToken,
) -> String {
    if detection.lang != Lang::Unknown || detection.confidence < 0.5 {
        return text.to_string();
    }
    let req = ChatRequest {
        model: String::new(),
        system: "Translate the user's message to English. Reply with the translation only."
            .to_string(),
        messages: vec![Message::user(text.to_string())],
        max_tokens: 256,
    };
    match ctx.providers.chat(TaskKind::Translate, &req, Some(cancel)).await {
        Ok((reply, _)) if !reply.content.trim().is_empty() => {
            debug!("foreign message translated for classification");
            reply.content.trim().to_string()
        }
        _ => text.to_string(),
    }
}

fn spawn_summarizer(ctx: &Arc<AgentContext>, phone: PhoneKey) {
    let store = ctx.store.clone();
    let providers = ctx.providers.clone();
    let threshold = ctx.config.assistant.summarize_threshold;
    let keep_tail = ctx.config.assistant.summarize_keep_tail;
    tokio::spawn(async move {
        summarize_if_needed(store, providers, phone, threshold, keep_tail).await;
    });
}

fn to_provider_messages(history: &[rainbow_conversations::StoredMessage]) -> Vec<Message> {
    history
        .iter()
        .map(|m| Message {
            role: match m.role.as_str() {
                "assistant" => Role::Assistant,
                "system" => Role::System,
                _ => Role::User,
            },
            content: m.content.clone(),
        })
        .collect()
}

fn language_name(lang: Lang) -> &'static str {
    match lang {
        Lang::En | Lang::Unknown => "English",
        Lang::Ms => "Bahasa Melayu",
        Lang::Zh => "Chinese (Simplified)",
    }
}
