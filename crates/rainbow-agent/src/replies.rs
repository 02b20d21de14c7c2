//! Static reply selection.
//!
//! Canned replies come from `knowledge.json` keyed by intent × language; a
//! built-in set covers the intents the assistant can never be speechless
//! about (greeting, unknown, escalation acknowledgements) even on an empty
//! install.

use rainbow_core::Lang;
use rainbow_workflows::LocalizedText;

use crate::settings::StaticReplies;

pub struct ReplyBook {
    replies: std::collections::BTreeMap<String, LocalizedText>,
}

impl ReplyBook {
    pub fn from_doc(doc: StaticReplies) -> Self {
        Self {
            replies: doc.replies,
        }
    }

    /// Configured reply for an intent, falling back to the built-in set.
    pub fn reply(&self, intent: &str, lang: Lang) -> Option<String> {
        if let Some(text) = self.replies.get(intent) {
            return Some(text.get(lang).to_string());
        }
        builtin(intent).map(|t| t.get(lang).to_string())
    }

    /// Reply for an unrecognized message.
    pub fn unknown_reply(lang: Lang) -> String {
        match lang {
            Lang::Ms => "Maaf, saya kurang faham. Boleh terangkan dengan cara lain? Atau taip 'menu' untuk melihat apa yang saya boleh bantu.".to_string(),
            Lang::Zh => "抱歉，我没太明白。可以换个说法吗？输入“menu”可以查看我能帮忙的事项。".to_string(),
            Lang::En | Lang::Unknown => "Sorry, I didn't quite get that. Could you put it another way? Type 'menu' to see what I can help with.".to_string(),
        }
    }

    /// Acknowledgement sent while staff are pulled in (non-emergency).
    pub fn escalation_ack(lang: Lang) -> String {
        match lang {
            Lang::Ms => "Maaf atas kesulitan. Saya telah maklumkan kepada staf kami — seseorang akan menghubungi anda sebentar lagi.".to_string(),
            Lang::Zh => "抱歉给您带来不便。我已通知我们的工作人员，很快会有人联系您。".to_string(),
            Lang::En | Lang::Unknown => "I'm sorry about the trouble. I've notified our staff — someone will contact you shortly.".to_string(),
        }
    }

    /// Urgent acknowledgement for emergency intents.
    pub fn emergency_ack(lang: Lang) -> String {
        match lang {
            Lang::Ms => "Ini kecemasan — staf kami dimaklumkan SEKARANG dan akan datang segera. Jika perlu, hubungi 999.".to_string(),
            Lang::Zh => "这是紧急情况——我们的工作人员已立即收到通知，马上赶来。如有需要请拨打999。".to_string(),
            Lang::En | Lang::Unknown => "This is urgent — our staff have been alerted RIGHT NOW and are on their way. If needed, call 999 immediately.".to_string(),
        }
    }

    /// Capability menu appended to first-contact greetings.
    pub fn capability_menu(lang: Lang) -> String {
        match lang {
            Lang::Ms => "Saya boleh bantu dengan: tempahan, daftar masuk/keluar, kata laluan wifi, harga bilik, arah ke hostel, dan banyak lagi — tanya sahaja!".to_string(),
            Lang::Zh => "我可以帮您：预订床位、办理入住/退房、wifi密码、房价、到店路线等——尽管问！".to_string(),
            Lang::En | Lang::Unknown => "I can help with: bookings, check-in/check-out, the wifi password, room rates, directions to the hostel and more — just ask!".to_string(),
        }
    }
}

fn builtin(intent: &str) -> Option<LocalizedText> {
    match intent {
        "greeting" => Some(LocalizedText {
            en: "Hello! Welcome to Rainbow Capsule Hostel — I'm Rainbow, your assistant.".to_string(),
            ms: Some("Hai! Selamat datang ke Rainbow Capsule Hostel — saya Rainbow, pembantu anda.".to_string()),
            zh: Some("您好！欢迎来到Rainbow胶囊旅舍——我是您的助手Rainbow。".to_string()),
        }),
        "thanks" => Some(LocalizedText {
            en: "You're most welcome! Anything else I can help with?".to_string(),
            ms: Some("Sama-sama! Ada lagi yang boleh saya bantu?".to_string()),
            zh: Some("不客气！还有什么可以帮您的吗？".to_string()),
        }),
        "farewell" => Some(LocalizedText {
            en: "Safe travels! We'd love to host you again.".to_string(),
            ms: Some("Selamat jalan! Jumpa lagi di Rainbow.".to_string()),
            zh: Some("一路顺风！期待再次接待您。".to_string()),
        }),
        "card_locked" => Some(LocalizedText {
            en: "Oh no — come to the front desk with your ID and we'll re-activate your key card right away.".to_string(),
            ms: Some("Alamak — sila ke kaunter depan dengan ID anda, kami akan aktifkan semula kad kunci anda segera.".to_string()),
            zh: Some("别担心——请携带证件到前台，我们马上为您重新激活门卡。".to_string()),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn configured_replies_override_builtins() {
        let mut replies = BTreeMap::new();
        replies.insert(
            "greeting".to_string(),
            LocalizedText::en_only("Howdy from the config!"),
        );
        let book = ReplyBook::from_doc(StaticReplies {
            schema_version: 1,
            replies,
        });
        assert_eq!(
            book.reply("greeting", Lang::En).unwrap(),
            "Howdy from the config!"
        );
    }

    #[test]
    fn builtin_greeting_covers_empty_installs() {
        let book = ReplyBook::from_doc(StaticReplies::default());
        let reply = book.reply("greeting", Lang::En).unwrap();
        assert!(["Hello", "Welcome", "Hi"].iter().any(|w| reply.contains(w)));
        assert!(book.reply("greeting", Lang::Ms).unwrap().contains("Selamat"));
    }

    #[test]
    fn unrouted_intent_has_no_reply() {
        let book = ReplyBook::from_doc(StaticReplies::default());
        assert!(book.reply("quantum_physics", Lang::En).is_none());
    }

    #[test]
    fn menu_and_acks_are_localized() {
        assert!(ReplyBook::capability_menu(Lang::Ms).contains("tempahan"));
        assert!(ReplyBook::emergency_ack(Lang::En).contains("urgent"));
        assert!(ReplyBook::unknown_reply(Lang::Zh).contains("抱歉"));
    }
}
