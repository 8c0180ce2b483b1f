//! Completion notifications.
//!
//! The engine announces finished jobs and batch summaries through this trait;
//! the default sink writes them to the log. Embedders with a desktop bus or a
//! chat hook swap in their own implementation.

/// Receives one-line human-readable announcements.
pub trait Notifier: Send + Sync {
    fn notify(&self, summary: &str);
}

/// Default sink: announcements go to the log at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, summary: &str) {
        tracing::info!("{summary}");
    }
}
