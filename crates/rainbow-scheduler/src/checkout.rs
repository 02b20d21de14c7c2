//! Daily checkout alerts.
//!
//! Once a day, at the configured hour, every checked-in guest whose
//! advance-notice preference matches today gets a templated reminder. The
//! guest roster lives in the external hostel-management system; this module
//! only sees it through the [`GuestDirectory`] seam. `last_notified`
//! write-back prevents duplicate sends inside the same day.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{info, warn};

use rainbow_channels::OutboundMessenger;
use rainbow_core::{Lang, PhoneKey};

/// One checked-in guest as the external CRUD system reports them.
#[derive(Debug, Clone)]
pub struct GuestStay {
    pub phone: String,
    pub name: String,
    pub checkout_date: NaiveDate,
    /// Days-before-checkout on which to alert (0 = checkout day itself).
    pub notice_days: Vec<u32>,
    pub language: Lang,
    /// Last date an alert was sent, to suppress same-day duplicates.
    pub last_notified: Option<NaiveDate>,
}

/// Read/write seam to the external hostel-management collaborator.
#[async_trait]
pub trait GuestDirectory: Send + Sync {
    async fn checked_in_guests(&self) -> Result<Vec<GuestStay>, String>;

    /// Record that a guest was alerted on `date`.
    async fn record_notified(&self, phone: &str, date: NaiveDate) -> Result<(), String>;
}

/// Run one checkout-alert pass for `today`. Returns how many alerts went
/// out. Called by the daily job in the gateway; `today` is a parameter so
/// tests control the calendar.
pub async fn run_checkout_alerts(
    directory: &dyn GuestDirectory,
    messenger: &Arc<dyn OutboundMessenger>,
    today: NaiveDate,
) -> usize {
    let guests = match directory.checked_in_guests().await {
        Ok(g) => g,
        Err(e) => {
            warn!(error = %e, "checkout alerts: guest directory unavailable");
            return 0;
        }
    };

    let mut sent = 0usize;
    for guest in guests {
        let days_left = (guest.checkout_date - today).num_days();
        if days_left < 0 {
            continue;
        }
        if !guest.notice_days.iter().any(|d| *d as i64 == days_left) {
            continue;
        }
        if guest.last_notified == Some(today) {
            continue;
        }

        let phone = match PhoneKey::parse(&guest.phone) {
            Ok(p) => p,
            Err(e) => {
                warn!(guest = %guest.name, error = %e, "checkout alerts: bad phone");
                continue;
            }
        };

        let text = alert_text(&guest, days_left);
        match messenger.send(&phone, &text).await {
            Ok(()) => {
                if let Err(e) = directory.record_notified(&guest.phone, today).await {
                    warn!(guest = %guest.name, error = %e, "checkout alerts: record_notified failed");
                }
                sent += 1;
            }
            Err(e) => warn!(guest = %guest.name, error = %e, "checkout alerts: send failed"),
        }
    }

    info!(sent, date = %today, "checkout alert pass complete");
    sent
}

/// Long-running daily job: sleep until the configured local hour, run one
/// alert pass, repeat. Shuts down when `shutdown` broadcasts true.
pub async fn run_checkout_alert_loop(
    hour: u8,
    directory: Arc<dyn GuestDirectory>,
    messenger: Arc<dyn OutboundMessenger>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        let wait = seconds_until_hour(chrono::Local::now(), hour);
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(wait)) => {
                let today = chrono::Local::now().date_naive();
                run_checkout_alerts(directory.as_ref(), &messenger, today).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("checkout alert loop shutting down");
                    break;
                }
            }
        }
    }
}

fn seconds_until_hour(now: chrono::DateTime<chrono::Local>, hour: u8) -> u64 {
    use chrono::Timelike;
    let target_today = now
        .date_naive()
        .and_hms_opt(hour as u32, 0, 0)
        .unwrap_or_else(|| now.naive_local());
    let target = if now.time().hour() >= hour as u32 {
        target_today + chrono::Duration::days(1)
    } else {
        target_today
    };
    (target - now.naive_local()).num_seconds().max(1) as u64
}

fn alert_text(guest: &GuestStay, days_left: i64) -> String {
    let date = guest.checkout_date.format("%d %b %Y");
    match (guest.language, days_left) {
        (Lang::Ms, 0) => format!(
            "Hai {}! Peringatan: daftar keluar anda adalah hari ini sebelum 12 tengah hari. Perlukan bantuan bagasi?",
            guest.name
        ),
        (Lang::Ms, _) => format!(
            "Hai {}! Peringatan: daftar keluar anda pada {} sebelum 12 tengah hari.",
            guest.name, date
        ),
        (Lang::Zh, 0) => format!("{}您好！提醒：您今天中午12点前退房。需要寄存行李吗？", guest.name),
        (Lang::Zh, _) => format!("{}您好！提醒：您将于{}中午12点前退房。", guest.name, date),
        (_, 0) => format!(
            "Hi {}! Reminder: your checkout is today before 12 noon. Need a hand with luggage storage?",
            guest.name
        ),
        (_, _) => format!(
            "Hi {}! Reminder: your checkout is on {} before 12 noon.",
            guest.name, date
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rainbow_channels::MemoryMessenger;
    use std::sync::Mutex;

    struct FakeDirectory {
        guests: Mutex<Vec<GuestStay>>,
    }

    #[async_trait]
    impl GuestDirectory for FakeDirectory {
        async fn checked_in_guests(&self) -> Result<Vec<GuestStay>, String> {
            Ok(self.guests.lock().unwrap().clone())
        }
        async fn record_notified(&self, phone: &str, date: NaiveDate) -> Result<(), String> {
            let mut guests = self.guests.lock().unwrap();
            if let Some(g) = guests.iter_mut().find(|g| g.phone == phone) {
                g.last_notified = Some(date);
            }
            Ok(())
        }
    }

    fn guest(phone: &str, checkout: NaiveDate, notice: Vec<u32>) -> GuestStay {
        GuestStay {
            phone: phone.to_string(),
            name: "Ana".to_string(),
            checkout_date: checkout,
            notice_days: notice,
            language: Lang::En,
            last_notified: None,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 1).unwrap()
    }

    #[tokio::test]
    async fn alerts_only_guests_whose_notice_matches_today() {
        let directory = FakeDirectory {
            guests: Mutex::new(vec![
                // Checks out tomorrow, wants 1-day notice: alert.
                guest("60111111111", today().succ_opt().unwrap(), vec![1]),
                // Checks out tomorrow, wants same-day notice only: no alert.
                guest("60122222222", today().succ_opt().unwrap(), vec![0]),
                // Checks out today with same-day notice: alert.
                guest("60133333333", today(), vec![0]),
            ]),
        };
        let messenger = MemoryMessenger::new();
        let outbound: Arc<dyn OutboundMessenger> = messenger.clone();

        let sent = run_checkout_alerts(&directory, &outbound, today()).await;
        assert_eq!(sent, 2);
        let texts: Vec<String> = messenger.sent().iter().map(|m| m.text.clone()).collect();
        assert!(texts.iter().any(|t| t.contains("today")));
    }

    #[tokio::test]
    async fn same_day_duplicates_are_suppressed() {
        let directory = FakeDirectory {
            guests: Mutex::new(vec![guest("60111111111", today(), vec![0])]),
        };
        let messenger = MemoryMessenger::new();
        let outbound: Arc<dyn OutboundMessenger> = messenger.clone();

        assert_eq!(run_checkout_alerts(&directory, &outbound, today()).await, 1);
        // Second pass on the same day: last_notified blocks the resend.
        assert_eq!(run_checkout_alerts(&directory, &outbound, today()).await, 0);
        assert_eq!(messenger.sent().len(), 1);
    }

    #[tokio::test]
    async fn localized_alert_text() {
        let mut g = guest("60111111111", today(), vec![0]);
        g.language = Lang::Ms;
        g.name = "Aiman".to_string();
        let text = alert_text(&g, 0);
        assert!(text.contains("Aiman"));
        assert!(text.contains("hari ini"));
    }
}
