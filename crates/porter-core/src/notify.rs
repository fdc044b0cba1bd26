use crate::models::CoreError;

pub const PREVIEW_LIMIT: usize = 200;

/// Best-effort user notification sink. Callers ignore failures.
pub trait Notifier: Send + Sync {
    fn send(&self, title: &str, message: &str) -> Result<(), CoreError>;

    fn send_with_subtitle(&self, title: &str, subtitle: &str, message: &str)
    -> Result<(), CoreError>;
}

/// Emits notifications as `info` events on the `porter::notify` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier {
    enabled: bool,
    show_previews: bool,
}

impl TracingNotifier {
    pub fn new(enabled: bool, show_previews: bool) -> Self {
        Self {
            enabled,
            show_previews,
        }
    }

    fn preview<'a>(&self, message: &'a str) -> std::borrow::Cow<'a, str> {
        if !self.show_previews {
            return message.into();
        }
        match message.char_indices().nth(PREVIEW_LIMIT) {
            Some((cut, _)) => format!("{}...", &message[..cut]).into(),
            None => message.into(),
        }
    }
}

impl Notifier for TracingNotifier {
    fn send(&self, title: &str, message: &str) -> Result<(), CoreError> {
        if self.enabled {
            tracing::info!(target: "porter::notify", title, body = %self.preview(message), "notification");
        }
        Ok(())
    }

    fn send_with_subtitle(
        &self,
        title: &str,
        subtitle: &str,
        message: &str,
    ) -> Result<(), CoreError> {
        if self.enabled {
            tracing::info!(
                target: "porter::notify",
                title,
                subtitle,
                body = %self.preview(message),
                "notification"
            );
        }
        Ok(())
    }
}
