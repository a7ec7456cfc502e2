use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Loading,
    Success,
    Warning,
    Error,
}

/// A user-facing message. Notices sharing an `id` replace each other, so a
/// "Saving…" notice can be swapped in place for its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            id: None,
            level,
            message: message.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Writes notices to the log.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        let id = notice.id.as_deref().unwrap_or("-");
        match notice.level {
            NoticeLevel::Loading => tracing::debug!(notice_id = id, "{}", notice.message),
            NoticeLevel::Success => tracing::info!(notice_id = id, "{}", notice.message),
            NoticeLevel::Warning => tracing::warn!(notice_id = id, "{}", notice.message),
            NoticeLevel::Error => tracing::error!(notice_id = id, "{}", notice.message),
        }
    }
}

/// Fans notices out to any number of UI listeners.
pub struct ChannelNotifier {
    tx: broadcast::Sender<Notice>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notice: Notice) {
        // Ignore send errors (no subscribers)
        let _ = self.tx.send(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_notifier_delivers() {
        let notifier = ChannelNotifier::new(8);
        let mut rx = notifier.subscribe();
        notifier.notify(Notice::new(NoticeLevel::Success, "done").with_id("save-1"));

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.id.as_deref(), Some("save-1"));
        assert_eq!(notice.level, NoticeLevel::Success);
    }

    #[test]
    fn test_channel_notifier_without_listeners() {
        ChannelNotifier::new(1).notify(Notice::new(NoticeLevel::Error, "nobody hears this"));
    }

    #[test]
    fn test_notice_serialization() {
        let json = serde_json::to_value(Notice::new(NoticeLevel::Warning, "careful")).unwrap();
        assert_eq!(json["level"], "warning");
        assert!(json.get("id").is_none());
    }
}
