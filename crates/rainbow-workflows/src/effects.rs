//! Side-effect registry.
//!
//! Steps name their side effects ("notify_staff", "forward_media",
//! "schedule_followup"); the registry resolves names to implementations at
//! runtime. Effects run after the outbound reply is queued and are strictly
//! best-effort — a failure is logged and never blocks or rewinds the
//! workflow.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::types::WorkflowError;

/// One requested invocation, with enough context for any effect kind.
#[derive(Debug, Clone, Serialize)]
pub struct EffectCall {
    pub name: String,
    pub phone: String,
    pub workflow_id: String,
    pub step_id: String,
    /// Slot snapshot at invocation time.
    pub slots: std::collections::BTreeMap<String, String>,
}

#[async_trait]
pub trait SideEffect: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, call: &EffectCall) -> Result<(), WorkflowError>;
}

#[derive(Default)]
pub struct EffectRegistry {
    effects: HashMap<String, Arc<dyn SideEffect>>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, effect: Arc<dyn SideEffect>) {
        self.effects.insert(effect.name().to_string(), effect);
    }

    /// Run a batch of effect calls, best-effort. Unknown names and failures
    /// are logged; the caller never sees an error.
    pub async fn run_all(&self, calls: &[EffectCall]) {
        for call in calls {
            match self.effects.get(&call.name) {
                Some(effect) => match effect.run(call).await {
                    Ok(()) => info!(effect = %call.name, phone = %call.phone, "side effect ran"),
                    Err(e) => {
                        warn!(effect = %call.name, phone = %call.phone, error = %e, "side effect failed")
                    }
                },
                None => warn!(effect = %call.name, "side effect not registered"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting {
        name: &'static str,
        runs: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl SideEffect for Counting {
        fn name(&self) -> &str {
            self.name
        }
        async fn run(&self, _call: &EffectCall) -> Result<(), WorkflowError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(WorkflowError::EffectFailed {
                    name: self.name.to_string(),
                    reason: "boom".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn call(name: &str) -> EffectCall {
        EffectCall {
            name: name.to_string(),
            phone: "60123456789".to_string(),
            workflow_id: "booking".to_string(),
            step_id: "done".to_string(),
            slots: Default::default(),
        }
    }

    #[tokio::test]
    async fn runs_registered_effects_and_survives_failures() {
        let runs = Arc::new(AtomicU32::new(0));
        let mut registry = EffectRegistry::new();
        registry.register(Arc::new(Counting {
            name: "notify_staff",
            runs: runs.clone(),
            fail: true,
        }));
        registry.register(Arc::new(Counting {
            name: "schedule_followup",
            runs: runs.clone(),
            fail: false,
        }));

        registry
            .run_all(&[
                call("notify_staff"),
                call("schedule_followup"),
                call("not_registered"),
            ])
            .await;

        // Both registered effects ran; the failure and the unknown name
        // were swallowed.
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
