use std::sync::Mutex;

use chrono::DateTime;
use rusqlite::Connection;
use tracing::{debug, warn};

use rainbow_core::{Lang, PhoneKey, ResponseMode, WorkflowCursor};

use crate::db::init_db;
use crate::error::{ConversationError, Result};
use crate::types::{Conversation, Counters, LastIntent, MessageMeta, StoredMessage};

/// Thread-safe store for conversations and their message logs.
///
/// Wraps a single SQLite connection in a `Mutex`. Ordering within a
/// conversation is the caller's job (per-phone workers); this type only
/// guarantees each statement runs alone.
pub struct ConversationStore {
    pub(crate) db: Mutex<Connection>,
    /// Messages that failed to persist, kept in memory and retried on the
    /// next append so nothing is dropped silently.
    pending: Mutex<Vec<PendingMessage>>,
}

struct PendingMessage {
    phone: String,
    role: String,
    content: String,
    meta: MessageMeta,
    created_at: String,
}

impl ConversationStore {
    /// Wrap a connection, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            pending: Mutex::new(Vec::new()),
        })
    }

    /// Return an existing conversation or create a fresh one (upsert).
    pub fn get_or_create(&self, phone: &PhoneKey) -> Result<Conversation> {
        if let Some(conv) = self.get(phone)? {
            debug!(phone = %phone, "conversation exists");
            return Ok(conv);
        }

        let now = now_rfc3339();
        {
            let db = self.db.lock().unwrap();
            db.execute(
                "INSERT OR IGNORE INTO conversations (phone, created_at, updated_at)
                 VALUES (?1, ?2, ?2)",
                rusqlite::params![phone.as_str(), now],
            )?;
        }
        // Read back — covers the race where two callers insert at once.
        self.get(phone)?.ok_or_else(|| ConversationError::NotFound {
            phone: phone.to_string(),
        })
    }

    /// Fetch a conversation snapshot, `None` if it does not exist.
    pub fn get(&self, phone: &PhoneKey) -> Result<Option<Conversation>> {
        let db = self.db.lock().unwrap();
        let conv = match db.query_row(
            "SELECT phone, language, display_name, assigned_unit, favourite, pinned,
                    archived, response_mode, last_read_at, unknown_count, repeat_count,
                    consecutive_negative_count, last_sentiment_escalation_at,
                    last_intent, last_intent_confidence, last_intent_at,
                    workflow_cursor, message_count, total_tokens, created_at, updated_at
             FROM conversations WHERE phone = ?1",
            rusqlite::params![phone.as_str()],
            row_to_conversation,
        ) {
            Ok(c) => c,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(ConversationError::Database(e)),
        };
        Ok(Some(conv))
    }

    /// Append a message, clamping its timestamp so per-conversation
    /// timestamps never run backwards.
    ///
    /// A database failure buffers the message in memory (retried on the
    /// next append) rather than dropping it; the returned id is `-1` for a
    /// buffered message.
    pub fn append_message(
        &self,
        phone: &PhoneKey,
        role: &str,
        content: &str,
        meta: MessageMeta,
    ) -> Result<StoredMessage> {
        let db = self.db.lock().unwrap();
        self.flush_pending_locked(&db);

        let last_at: Option<String> = db
            .query_row(
                "SELECT created_at FROM messages WHERE phone = ?1 ORDER BY id DESC LIMIT 1",
                rusqlite::params![phone.as_str()],
                |row| row.get(0),
            )
            .ok();
        let created_at = clamp_monotonic(now_rfc3339(), last_at);

        match insert_message(&db, phone.as_str(), role, content, &meta, &created_at) {
            Ok(id) => {
                db.execute(
                    "UPDATE conversations
                     SET message_count = message_count + 1,
                         total_tokens  = total_tokens + ?1,
                         updated_at    = ?2
                     WHERE phone = ?3",
                    rusqlite::params![
                        (meta.tokens_in + meta.tokens_out) as i64,
                        created_at,
                        phone.as_str()
                    ],
                )?;
                Ok(StoredMessage {
                    id,
                    phone: phone.to_string(),
                    role: role.to_string(),
                    content: content.to_string(),
                    created_at,
                    meta,
                })
            }
            Err(e) => {
                warn!(phone = %phone, error = %e, "message insert failed, buffering in memory");
                let msg = StoredMessage {
                    id: -1,
                    phone: phone.to_string(),
                    role: role.to_string(),
                    content: content.to_string(),
                    created_at: created_at.clone(),
                    meta: meta.clone(),
                };
                self.pending.lock().unwrap().push(PendingMessage {
                    phone: phone.to_string(),
                    role: role.to_string(),
                    content: content.to_string(),
                    meta,
                    created_at,
                });
                Ok(msg)
            }
        }
    }

    /// Retry any buffered messages. Called opportunistically before appends.
    fn flush_pending_locked(&self, db: &Connection) {
        let mut pending = self.pending.lock().unwrap();
        if pending.is_empty() {
            return;
        }
        let mut kept = Vec::new();
        for msg in pending.drain(..) {
            match insert_message(db, &msg.phone, &msg.role, &msg.content, &msg.meta, &msg.created_at)
            {
                Ok(_) => {
                    let _ = db.execute(
                        "UPDATE conversations
                         SET message_count = message_count + 1,
                             total_tokens  = total_tokens + ?1,
                             updated_at    = ?2
                         WHERE phone = ?3",
                        rusqlite::params![
                            (msg.meta.tokens_in + msg.meta.tokens_out) as i64,
                            msg.created_at,
                            msg.phone
                        ],
                    );
                    debug!(phone = %msg.phone, "buffered message flushed");
                }
                Err(_) => kept.push(msg),
            }
        }
        *pending = kept;
    }

    /// The most recent `limit` messages, oldest first.
    pub fn history(&self, phone: &PhoneKey, limit: usize) -> Result<Vec<StoredMessage>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, phone, role, content, intent, confidence, tier, model,
                    response_ms, kb_topics, action, workflow_id, step_id,
                    tokens_in, tokens_out, manual, summary, created_at
             FROM messages WHERE phone = ?1
             ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![phone.as_str(), limit as i64],
            row_to_message,
        )?;
        let mut msgs: Vec<_> = rows.filter_map(|r| r.ok()).collect();
        msgs.reverse();
        Ok(msgs)
    }

    /// The oldest `limit` messages — summarization input.
    pub fn oldest_messages(&self, phone: &PhoneKey, limit: usize) -> Result<Vec<StoredMessage>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, phone, role, content, intent, confidence, tier, model,
                    response_ms, kb_topics, action, workflow_id, step_id,
                    tokens_in, tokens_out, manual, summary, created_at
             FROM messages WHERE phone = ?1
             ORDER BY id ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![phone.as_str(), limit as i64],
            row_to_message,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn message_count(&self, phone: &PhoneKey) -> Result<u32> {
        let db = self.db.lock().unwrap();
        let n: i64 = db.query_row(
            "SELECT COUNT(*) FROM messages WHERE phone = ?1",
            rusqlite::params![phone.as_str()],
            |row| row.get(0),
        )?;
        Ok(n as u32)
    }

    /// Replace the oldest messages (by id) with a summary system message in
    /// one transaction. The summary inherits the first deleted message's
    /// timestamp so ordering stays intact.
    pub fn replace_with_summary(
        &self,
        phone: &PhoneKey,
        message_ids: &[i64],
        summary_text: &str,
    ) -> Result<()> {
        if message_ids.is_empty() {
            return Ok(());
        }
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        let first_at: String = tx.query_row(
            "SELECT created_at FROM messages WHERE id = ?1",
            rusqlite::params![message_ids[0]],
            |row| row.get(0),
        )?;

        for id in message_ids {
            tx.execute("DELETE FROM messages WHERE id = ?1", rusqlite::params![id])?;
        }

        let meta = MessageMeta {
            summary: true,
            ..Default::default()
        };
        insert_message(&tx, phone.as_str(), "system", summary_text, &meta, &first_at)?;

        let delta = message_ids.len() as i64 - 1;
        tx.execute(
            "UPDATE conversations
             SET message_count = MAX(message_count - ?1, 0), updated_at = ?2
             WHERE phone = ?3",
            rusqlite::params![delta, now_rfc3339(), phone.as_str()],
        )?;

        tx.commit()?;
        Ok(())
    }

    // --- durable field updates --------------------------------------------

    pub fn set_language(&self, phone: &PhoneKey, lang: Lang) -> Result<()> {
        self.update_field(phone, "language", &lang.to_string())
    }

    pub fn set_display_name(&self, phone: &PhoneKey, name: Option<&str>) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE conversations SET display_name = ?1, updated_at = ?2 WHERE phone = ?3",
            rusqlite::params![name, now_rfc3339(), phone.as_str()],
        )?;
        Ok(())
    }

    pub fn set_response_mode(&self, phone: &PhoneKey, mode: Option<ResponseMode>) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE conversations SET response_mode = ?1, updated_at = ?2 WHERE phone = ?3",
            rusqlite::params![
                mode.map(|m| m.to_string()),
                now_rfc3339(),
                phone.as_str()
            ],
        )?;
        Ok(())
    }

    pub fn set_favourite(&self, phone: &PhoneKey, favourite: bool) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE conversations SET favourite = ?1, updated_at = ?2 WHERE phone = ?3",
            rusqlite::params![favourite as i64, now_rfc3339(), phone.as_str()],
        )?;
        Ok(())
    }

    pub fn set_pinned(&self, phone: &PhoneKey, pinned: bool) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE conversations SET pinned = ?1, updated_at = ?2 WHERE phone = ?3",
            rusqlite::params![pinned as i64, now_rfc3339(), phone.as_str()],
        )?;
        Ok(())
    }

    pub fn set_archived(&self, phone: &PhoneKey, archived: bool) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE conversations SET archived = ?1, updated_at = ?2 WHERE phone = ?3",
            rusqlite::params![archived as i64, now_rfc3339(), phone.as_str()],
        )?;
        Ok(())
    }

    pub fn mark_read(&self, phone: &PhoneKey) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE conversations SET last_read_at = ?1 WHERE phone = ?2",
            rusqlite::params![now_rfc3339(), phone.as_str()],
        )?;
        Ok(())
    }

    /// Conversations with an active workflow, for the idle-timeout sweeper.
    pub fn active_workflows(&self) -> Result<Vec<(PhoneKey, WorkflowCursor, Lang)>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT phone, workflow_cursor, language FROM conversations
             WHERE workflow_cursor IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        Ok(rows
            .filter_map(|r| r.ok())
            .filter_map(|(phone, cursor_json, lang)| {
                let cursor: WorkflowCursor = serde_json::from_str(&cursor_json).ok()?;
                Some((PhoneKey(phone), cursor, lang.parse().unwrap_or(Lang::En)))
            })
            .collect())
    }

    /// Persist (or clear) the workflow cursor.
    pub fn set_workflow(&self, phone: &PhoneKey, cursor: Option<&WorkflowCursor>) -> Result<()> {
        let json = cursor.map(serde_json::to_string).transpose()?;
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE conversations SET workflow_cursor = ?1, updated_at = ?2 WHERE phone = ?3",
            rusqlite::params![json, now_rfc3339(), phone.as_str()],
        )?;
        Ok(())
    }

    /// Update intent counters for one classified turn.
    ///
    /// `recognized = None` means the classifier returned `unknown`:
    /// `unknown_count` increments. A recognized intent resets it and bumps
    /// `repeat_count` when it matches the previous recognized intent
    /// (0 on first occurrence, so the 3rd identical turn reads 2).
    pub fn update_intent_counters(
        &self,
        phone: &PhoneKey,
        recognized: Option<(&str, f64)>,
    ) -> Result<Counters> {
        let conv = self.get_or_create(phone)?;
        let mut counters = conv.counters.clone();
        let now = now_rfc3339();

        let db = self.db.lock().unwrap();
        match recognized {
            None => {
                counters.unknown_count += 1;
                db.execute(
                    "UPDATE conversations SET unknown_count = ?1, updated_at = ?2
                     WHERE phone = ?3",
                    rusqlite::params![counters.unknown_count, now, phone.as_str()],
                )?;
            }
            Some((intent, confidence)) => {
                counters.unknown_count = 0;
                let same = conv
                    .last_intent
                    .as_ref()
                    .is_some_and(|last| last.intent == intent);
                counters.repeat_count = if same { counters.repeat_count + 1 } else { 0 };
                db.execute(
                    "UPDATE conversations
                     SET unknown_count = 0, repeat_count = ?1,
                         last_intent = ?2, last_intent_confidence = ?3,
                         last_intent_at = ?4, updated_at = ?4
                     WHERE phone = ?5",
                    rusqlite::params![
                        counters.repeat_count,
                        intent,
                        confidence,
                        now,
                        phone.as_str()
                    ],
                )?;
            }
        }
        Ok(counters)
    }

    /// Update the consecutive-negative counter for one turn.
    pub fn update_sentiment(&self, phone: &PhoneKey, negative: bool) -> Result<Counters> {
        let conv = self.get_or_create(phone)?;
        let mut counters = conv.counters.clone();
        counters.consecutive_negative_count = if negative {
            counters.consecutive_negative_count + 1
        } else {
            0
        };
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE conversations SET consecutive_negative_count = ?1, updated_at = ?2
             WHERE phone = ?3",
            rusqlite::params![
                counters.consecutive_negative_count,
                now_rfc3339(),
                phone.as_str()
            ],
        )?;
        Ok(counters)
    }

    /// Record a sentiment escalation: reset the counter and stamp the
    /// cooldown anchor.
    pub fn mark_sentiment_escalation(&self, phone: &PhoneKey) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE conversations
             SET consecutive_negative_count = 0,
                 last_sentiment_escalation_at = ?1, updated_at = ?1
             WHERE phone = ?2",
            rusqlite::params![now_rfc3339(), phone.as_str()],
        )?;
        Ok(())
    }

    // --- tags --------------------------------------------------------------

    /// Add a tag to the registry (case-insensitive unique) and attach it.
    pub fn tag_conversation(&self, phone: &PhoneKey, name: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO tags (name, created_at) VALUES (?1, ?2)",
            rusqlite::params![name, now_rfc3339()],
        )?;
        let tag_id: i64 = db.query_row(
            "SELECT id FROM tags WHERE name = ?1 COLLATE NOCASE",
            rusqlite::params![name],
            |row| row.get(0),
        )?;
        db.execute(
            "INSERT OR IGNORE INTO conversation_tags (phone, tag_id) VALUES (?1, ?2)",
            rusqlite::params![phone.as_str(), tag_id],
        )?;
        Ok(())
    }

    pub fn untag_conversation(&self, phone: &PhoneKey, name: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let tag_id: i64 = match db.query_row(
            "SELECT id FROM tags WHERE name = ?1 COLLATE NOCASE",
            rusqlite::params![name],
            |row| row.get(0),
        ) {
            Ok(id) => id,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(ConversationError::TagNotFound {
                    name: name.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        db.execute(
            "DELETE FROM conversation_tags WHERE phone = ?1 AND tag_id = ?2",
            rusqlite::params![phone.as_str(), tag_id],
        )?;
        Ok(())
    }

    pub fn tags_for(&self, phone: &PhoneKey) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT t.name FROM tags t
             JOIN conversation_tags ct ON ct.tag_id = t.id
             WHERE ct.phone = ?1 ORDER BY t.name",
        )?;
        let rows = stmt.query_map(rusqlite::params![phone.as_str()], |row| row.get(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn all_tags(&self) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare("SELECT name FROM tags ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn update_field(&self, phone: &PhoneKey, column: &str, value: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        // Column names come from a fixed internal set, never user input.
        let sql = format!(
            "UPDATE conversations SET {} = ?1, updated_at = ?2 WHERE phone = ?3",
            column
        );
        db.execute(&sql, rusqlite::params![value, now_rfc3339(), phone.as_str()])?;
        Ok(())
    }
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Never let a new timestamp sort before the previous message's.
fn clamp_monotonic(now: String, last: Option<String>) -> String {
    let Some(last) = last else { return now };
    match (
        DateTime::parse_from_rfc3339(&now),
        DateTime::parse_from_rfc3339(&last),
    ) {
        (Ok(n), Ok(l)) if l > n => last,
        _ => now,
    }
}

fn insert_message(
    db: &Connection,
    phone: &str,
    role: &str,
    content: &str,
    meta: &MessageMeta,
    created_at: &str,
) -> rusqlite::Result<i64> {
    let kb_topics = if meta.kb_topics.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&meta.kb_topics).unwrap_or_default())
    };
    db.execute(
        "INSERT INTO messages
         (phone, role, content, intent, confidence, tier, model, response_ms,
          kb_topics, action, workflow_id, step_id, tokens_in, tokens_out,
          manual, summary, created_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
        rusqlite::params![
            phone,
            role,
            content,
            meta.intent,
            meta.confidence,
            meta.tier.map(|t| t.to_string()),
            meta.model,
            meta.response_ms.map(|ms| ms as i64),
            kb_topics,
            meta.action,
            meta.workflow_id,
            meta.step_id,
            meta.tokens_in,
            meta.tokens_out,
            meta.manual as i64,
            meta.summary as i64,
            created_at,
        ],
    )?;
    Ok(db.last_insert_rowid())
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let tier_str: Option<String> = row.get(6)?;
    let kb_json: Option<String> = row.get(9)?;
    Ok(StoredMessage {
        id: row.get(0)?,
        phone: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(17)?,
        meta: MessageMeta {
            intent: row.get(4)?,
            confidence: row.get(5)?,
            tier: tier_str.and_then(|t| t.parse().ok()),
            model: row.get(7)?,
            response_ms: row.get::<_, Option<i64>>(8)?.map(|ms| ms as u64),
            kb_topics: kb_json
                .and_then(|j| serde_json::from_str(&j).ok())
                .unwrap_or_default(),
            action: row.get(10)?,
            workflow_id: row.get(11)?,
            step_id: row.get(12)?,
            tokens_in: row.get::<_, i64>(13)? as u32,
            tokens_out: row.get::<_, i64>(14)? as u32,
            manual: row.get::<_, i64>(15)? != 0,
            summary: row.get::<_, i64>(16)? != 0,
        },
    })
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let lang_str: String = row.get(1)?;
    let mode_str: Option<String> = row.get(7)?;
    let cursor_json: Option<String> = row.get(16)?;
    let last_intent: Option<String> = row.get(13)?;

    Ok(Conversation {
        phone: PhoneKey(row.get(0)?),
        language: lang_str.parse().unwrap_or(Lang::En),
        display_name: row.get(2)?,
        assigned_unit: row.get(3)?,
        favourite: row.get::<_, i64>(4)? != 0,
        pinned: row.get::<_, i64>(5)? != 0,
        archived: row.get::<_, i64>(6)? != 0,
        response_mode: mode_str.and_then(|m| m.parse().ok()),
        last_read_at: row.get(8)?,
        counters: Counters {
            unknown_count: row.get::<_, i64>(9)? as u32,
            repeat_count: row.get::<_, i64>(10)? as u32,
            consecutive_negative_count: row.get::<_, i64>(11)? as u32,
            last_sentiment_escalation_at: row.get(12)?,
        },
        last_intent: last_intent.map(|intent| LastIntent {
            intent,
            confidence: row.get(14).unwrap_or(0.0),
            at: row.get(15).unwrap_or_default(),
        }),
        workflow: cursor_json.and_then(|j| serde_json::from_str(&j).ok()),
        message_count: row.get::<_, i64>(17)? as u32,
        total_tokens: row.get::<_, i64>(18)? as u64,
        created_at: row.get(19)?,
        updated_at: row.get(20)?,
    })
}
