//! Append-only intent prediction log and accuracy analytics.
//!
//! Every classification writes a row; staff thumbs validate the latest row
//! for a conversation. Only validated rows (`was_correct` not null) drive
//! the accuracy rate — unvalidated traffic shows up in counts but never in
//! the percentage.

use std::collections::BTreeMap;

use rainbow_core::{PhoneKey, Tier};

use crate::error::{ConversationError, Result};
use crate::manager::{now_rfc3339, ConversationStore};
use crate::types::{AccuracyBucket, AccuracyReport, AccuracyRow, IntentPrediction};

impl ConversationStore {
    /// Record one classification outcome.
    pub fn log_prediction(
        &self,
        phone: &PhoneKey,
        message: &str,
        intent: &str,
        confidence: f64,
        tier: Tier,
        model: Option<&str>,
    ) -> Result<i64> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO intent_predictions
             (phone, message, intent, confidence, tier, model, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                phone.as_str(),
                message,
                intent,
                confidence,
                tier.to_string(),
                model,
                now_rfc3339(),
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Thumbs-up: the latest prediction for this conversation was right.
    pub fn mark_latest_correct(&self, phone: &PhoneKey) -> Result<()> {
        self.validate_latest(phone, true, None)
    }

    /// Thumbs-down: the latest prediction was wrong. Without a corrected
    /// intent from staff the actual intent is recorded as "unknown".
    pub fn mark_latest_incorrect(&self, phone: &PhoneKey, actual: Option<&str>) -> Result<()> {
        self.validate_latest(phone, false, Some(actual.unwrap_or("unknown")))
    }

    fn validate_latest(
        &self,
        phone: &PhoneKey,
        correct: bool,
        actual: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let id: i64 = match db.query_row(
            "SELECT id FROM intent_predictions WHERE phone = ?1 ORDER BY id DESC LIMIT 1",
            rusqlite::params![phone.as_str()],
            |row| row.get(0),
        ) {
            Ok(id) => id,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(ConversationError::NotFound {
                    phone: phone.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        db.execute(
            "UPDATE intent_predictions SET was_correct = ?1, actual_intent = ?2 WHERE id = ?3",
            rusqlite::params![correct as i64, actual, id],
        )?;
        Ok(())
    }

    /// The most recent predictions for a conversation, newest first.
    pub fn predictions_for(&self, phone: &PhoneKey, limit: usize) -> Result<Vec<IntentPrediction>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, phone, message, intent, confidence, tier, model,
                    actual_intent, was_correct, created_at
             FROM intent_predictions WHERE phone = ?1
             ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![phone.as_str(), limit as i64],
            row_to_prediction,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Full accuracy rollup: overall plus by-intent/by-tier/by-model slices.
    pub fn accuracy_report(&self) -> Result<AccuracyReport> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT intent, tier, model, was_correct FROM intent_predictions",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<i64>>(3)?,
            ))
        })?;

        let mut overall = AccuracyBucket::default();
        let mut by_intent: BTreeMap<String, AccuracyBucket> = BTreeMap::new();
        let mut by_tier: BTreeMap<String, AccuracyBucket> = BTreeMap::new();
        let mut by_model: BTreeMap<String, AccuracyBucket> = BTreeMap::new();

        for row in rows.filter_map(|r| r.ok()) {
            let (intent, tier, model, was_correct) = row;
            let verdict = was_correct.map(|v| v != 0);
            tally(&mut overall, verdict);
            tally(by_intent.entry(intent).or_default(), verdict);
            tally(by_tier.entry(tier).or_default(), verdict);
            if let Some(model) = model {
                tally(by_model.entry(model).or_default(), verdict);
            }
        }

        Ok(AccuracyReport {
            overall: overall.finish(),
            by_intent: finish_rows(by_intent),
            by_tier: finish_rows(by_tier),
            by_model: finish_rows(by_model),
        })
    }
}

fn tally(bucket: &mut AccuracyBucket, verdict: Option<bool>) {
    bucket.total += 1;
    match verdict {
        Some(true) => bucket.correct += 1,
        Some(false) => bucket.incorrect += 1,
        None => bucket.unvalidated += 1,
    }
}

fn finish_rows(map: BTreeMap<String, AccuracyBucket>) -> Vec<AccuracyRow> {
    map.into_iter()
        .map(|(key, bucket)| AccuracyRow {
            key,
            bucket: bucket.finish(),
        })
        .collect()
}

fn row_to_prediction(row: &rusqlite::Row<'_>) -> rusqlite::Result<IntentPrediction> {
    let tier_str: String = row.get(5)?;
    Ok(IntentPrediction {
        id: row.get(0)?,
        phone: row.get(1)?,
        message: row.get(2)?,
        intent: row.get(3)?,
        confidence: row.get(4)?,
        tier: tier_str.parse().unwrap_or(Tier::T4),
        model: row.get(6)?,
        actual_intent: row.get(7)?,
        was_correct: row.get::<_, Option<i64>>(8)?.map(|v| v != 0),
        created_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn store() -> ConversationStore {
        ConversationStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn phone() -> PhoneKey {
        PhoneKey::parse("60123456789").unwrap()
    }

    #[test]
    fn accuracy_rate_null_when_nothing_validated() {
        let store = store();
        let p = phone();
        store
            .log_prediction(&p, "hi", "greeting", 0.95, Tier::T2, None)
            .unwrap();

        let report = store.accuracy_report().unwrap();
        assert_eq!(report.overall.total, 1);
        assert_eq!(report.overall.unvalidated, 1);
        assert!(report.overall.accuracy_rate.is_none());
    }

    #[test]
    fn thumbs_validate_latest_prediction_only() {
        let store = store();
        let p = phone();
        store
            .log_prediction(&p, "hi", "greeting", 0.95, Tier::T2, None)
            .unwrap();
        store
            .log_prediction(&p, "wifi?", "wifi_password", 0.85, Tier::T3, Some("embed-1"))
            .unwrap();

        store.mark_latest_correct(&p).unwrap();
        let preds = store.predictions_for(&p, 10).unwrap();
        assert_eq!(preds[0].was_correct, Some(true));
        assert_eq!(preds[1].was_correct, None);
    }

    #[test]
    fn thumbs_down_records_unknown_actual_intent() {
        let store = store();
        let p = phone();
        store
            .log_prediction(&p, "???", "booking", 0.7, Tier::T4, Some("model-x"))
            .unwrap();
        store.mark_latest_incorrect(&p, None).unwrap();

        let preds = store.predictions_for(&p, 1).unwrap();
        assert_eq!(preds[0].was_correct, Some(false));
        assert_eq!(preds[0].actual_intent.as_deref(), Some("unknown"));
    }

    #[test]
    fn report_slices_by_tier_and_model() {
        let store = store();
        let p = phone();
        store
            .log_prediction(&p, "a", "greeting", 1.0, Tier::T1, None)
            .unwrap();
        store.mark_latest_correct(&p).unwrap();
        store
            .log_prediction(&p, "b", "greeting", 0.9, Tier::T4, Some("model-x"))
            .unwrap();
        store.mark_latest_incorrect(&p, Some("complaint")).unwrap();

        let report = store.accuracy_report().unwrap();
        assert_eq!(report.overall.accuracy_rate, Some(0.5));

        let t1 = report.by_tier.iter().find(|r| r.key == "T1").unwrap();
        assert_eq!(t1.bucket.accuracy_rate, Some(1.0));
        let t4 = report.by_tier.iter().find(|r| r.key == "T4").unwrap();
        assert_eq!(t4.bucket.accuracy_rate, Some(0.0));

        let model = report.by_model.iter().find(|r| r.key == "model-x").unwrap();
        assert_eq!(model.bucket.total, 1);
    }

    #[test]
    fn feedback_without_predictions_errors() {
        let store = store();
        assert!(store.mark_latest_correct(&phone()).is_err());
    }
}
