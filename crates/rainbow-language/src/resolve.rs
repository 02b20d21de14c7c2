use rainbow_core::Lang;

use crate::detect::Detection;

/// Detection confidence needed before a reply follows the detected language.
pub const ACCEPT_THRESHOLD: f64 = 0.7;
/// Confidence needed before the conversation's stored tag is rewritten.
/// Deliberately above [`ACCEPT_THRESHOLD`] so one confident-looking message
/// can sway a single reply without flip-flopping the durable tag.
pub const UPDATE_THRESHOLD: f64 = 0.8;

/// Resolve the language an outbound reply must use.
///
/// Priority: confident supported detection → stored conversation tag →
/// hardcoded English.
pub fn resolve_reply_language(detection: Detection, stored: Lang) -> Lang {
    if detection.lang.is_supported() && detection.confidence >= ACCEPT_THRESHOLD {
        return detection.lang;
    }
    if stored.is_supported() {
        return stored;
    }
    Lang::En
}

/// Whether this detection should durably rewrite the conversation tag.
pub fn should_update_stored(detection: Detection, stored: Lang) -> bool {
    detection.lang.is_supported()
        && detection.confidence >= UPDATE_THRESHOLD
        && detection.lang != stored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(lang: Lang, confidence: f64) -> Detection {
        Detection { lang, confidence }
    }

    #[test]
    fn confident_detection_wins() {
        assert_eq!(resolve_reply_language(det(Lang::Ms, 0.75), Lang::En), Lang::Ms);
    }

    #[test]
    fn weak_detection_falls_back_to_stored() {
        assert_eq!(resolve_reply_language(det(Lang::Ms, 0.6), Lang::Zh), Lang::Zh);
    }

    #[test]
    fn unknown_everything_falls_back_to_english() {
        assert_eq!(
            resolve_reply_language(det(Lang::Unknown, 0.9), Lang::Unknown),
            Lang::En
        );
    }

    #[test]
    fn boundary_exactly_at_accept_threshold() {
        assert_eq!(resolve_reply_language(det(Lang::Zh, 0.7), Lang::En), Lang::Zh);
        assert_eq!(resolve_reply_language(det(Lang::Zh, 0.699), Lang::En), Lang::En);
    }

    #[test]
    fn stored_tag_updates_only_above_update_threshold() {
        assert!(should_update_stored(det(Lang::Ms, 0.8), Lang::En));
        assert!(!should_update_stored(det(Lang::Ms, 0.79), Lang::En));
        // Same language — nothing to update.
        assert!(!should_update_stored(det(Lang::Ms, 0.95), Lang::Ms));
        // Unsupported detections never touch the tag.
        assert!(!should_update_stored(det(Lang::Unknown, 0.99), Lang::En));
    }

    #[test]
    fn hysteresis_band_uses_detected_without_updating() {
        // 0.7 <= conf < 0.8: reply in detected language, keep stored tag.
        let d = det(Lang::Ms, 0.75);
        assert_eq!(resolve_reply_language(d, Lang::En), Lang::Ms);
        assert!(!should_update_stored(d, Lang::En));
    }
}
