//! Cancel detection — runs before the tiers when a workflow is active.

use once_cell::sync::Lazy;
use regex::Regex;

/// English/Malay cancel phrases need word boundaries; the Chinese form is
/// matched bare since CJK has no word boundaries to anchor on.
static CANCEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(cancel|never ?mind|stop|forget it|batal|tak ?nak|tak ?jadi)\b|算了|取消")
        .expect("static cancel pattern")
});

/// True when the guest is backing out of the current workflow.
pub fn is_cancel_message(text: &str) -> bool {
    CANCEL_RE.is_match(text)
}
