use std::{path::PathBuf, str::FromStr, time::Duration};
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind_addr: String,
    pub port: u16,
    pub events_file: Option<PathBuf>,
    pub default_page_size: usize,
    pub submit_timeout: Duration,
    pub form_idle_timeout: Duration,
    pub max_open_forms: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".into(),
            port: 3000,
            events_file: None,
            default_page_size: 9,
            submit_timeout: Duration::from_secs(10),
            form_idle_timeout: Duration::from_secs(30 * 60),
            max_open_forms: 1000,
        }
    }
}

impl Settings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// Defaults overridden by the process environment. Call after
/// `dotenvy::dotenv()` so `.env` values are visible.
pub fn load_settings() -> Settings {
    settings_from(|key| std::env::var(key).ok())
}

fn settings_from(lookup: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Some(v) = lookup("BIND_ADDR").filter(|v| !v.trim().is_empty()) {
        settings.bind_addr = v;
    }
    if let Some(v) = parsed(&lookup, "PORT") {
        settings.port = v;
    }
    if let Some(v) = lookup("EVENTS_FILE").filter(|v| !v.trim().is_empty()) {
        settings.events_file = Some(PathBuf::from(v));
    }
    if let Some(v) = parsed::<usize>(&lookup, "DEFAULT_PAGE_SIZE").filter(|v| *v > 0) {
        settings.default_page_size = v;
    }
    if let Some(v) = parsed(&lookup, "SUBMIT_TIMEOUT_SECS") {
        settings.submit_timeout = Duration::from_secs(v);
    }
    if let Some(v) = parsed(&lookup, "FORM_IDLE_SECS") {
        settings.form_idle_timeout = Duration::from_secs(v);
    }
    if let Some(v) = parsed::<usize>(&lookup, "MAX_OPEN_FORMS").filter(|v| *v > 0) {
        settings.max_open_forms = v;
    }

    settings
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}
