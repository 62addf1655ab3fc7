//! Process-wide log output.
//!
//! [`init`] installs a `tracing` subscriber that writes one line per event:
//! JSON in production, a compact human-readable line everywhere else. Both
//! carry the service identity (`service`, `env`, optional `version`) and the
//! fields of every enclosing span, so a `request_id` attached by the
//! request-id middleware shows up on everything logged while serving that
//! request. Values of sensitive field names are replaced by [`MASKED`]
//! regardless of format.
//!
//! ```rust,no_run
//! use plinth::logging::{self, LogConfig};
//!
//! logging::init(&LogConfig::new("billing", "production").with_version("1.4.2"))
//!     .expect("logger installed once");
//! ```

use std::fmt;

use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::{FormatEvent, JsonFields, Writer};
use tracing_subscriber::fmt::{FmtContext, FormattedFields, MakeWriter};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

use crate::config;

/// Replacement for the value of any sensitive field.
pub const MASKED: &str = "[MASKED]";

const SENSITIVE_KEYS: [&str; 5] = ["password", "token", "secret", "access_token", "refresh_token"];

/// Case-insensitive exact match against the sensitive key list.
pub fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}

/// Replaces the values of sensitive keys in place, at any depth.
pub fn mask_sensitive(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if is_sensitive_key(key) {
                    *v = Value::from(MASKED);
                } else {
                    mask_sensitive(v);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(mask_sensitive),
        _ => {}
    }
}

// ── LogConfig ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub service: String,
    pub env: String,
    pub version: Option<String>,
    pub level: Level,
}

impl LogConfig {
    pub fn new(service: impl Into<String>, env: impl Into<String>) -> Self {
        Self { service: service.into(), env: env.into(), version: None, level: Level::INFO }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// `SERVICE_NAME`, `APP_ENV`, `APP_VERSION` and `LOG_LEVEL`, each optional.
    pub fn from_env() -> Self {
        let version = config::string_or("APP_VERSION", "");
        Self {
            service: config::string_or("SERVICE_NAME", "app"),
            env: config::string_or("APP_ENV", "development"),
            version: (!version.is_empty()).then_some(version),
            level: config::level_or("LOG_LEVEL", Level::INFO),
        }
    }

    pub fn is_production(&self) -> bool {
        self.env.eq_ignore_ascii_case("production") || self.env.eq_ignore_ascii_case("prod")
    }
}

/// Installs the global subscriber. `RUST_LOG`, when set, overrides
/// `config.level`. Fails if a global subscriber is already installed.
pub fn init(config: &LogConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.level).into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(layer(config, std::io::stdout))
        .try_init()
}

/// The formatting layer on its own, writing to `writer`.
pub fn layer<S, W>(config: &LogConfig, writer: W) -> impl Layer<S> + Send + Sync + 'static + use<S, W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .fmt_fields(JsonFields::new())
        .event_format(LineFormat::new(config))
        .with_writer(writer)
}

// ── LineFormat ───────────────────────────────────────────────────────────────

/// Keys owned by the line itself. Event or span fields with these names are
/// written as `fields.<name>` instead.
const RESERVED_KEYS: [&str; 6] = ["time", "level", "msg", "service", "env", "version"];

struct LineFormat {
    json: bool,
    identity: Vec<(&'static str, String)>,
}

impl LineFormat {
    fn new(config: &LogConfig) -> Self {
        let mut identity = vec![("service", config.service.clone()), ("env", config.env.clone())];
        if let Some(version) = &config.version {
            identity.push(("version", version.clone()));
        }
        Self { json: config.is_production(), identity }
    }

    fn write_json(&self, writer: &mut Writer<'_>, level: &Level, message: String, fields: Map<String, Value>) -> fmt::Result {
        let mut line = Map::new();
        for (key, value) in fields {
            if RESERVED_KEYS.contains(&key.as_str()) {
                line.insert(format!("fields.{key}"), value);
            } else {
                line.insert(key, value);
            }
        }
        line.insert("time".into(), Value::from(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)));
        line.insert("level".into(), Value::from(level.as_str()));
        line.insert("msg".into(), Value::from(message));
        for (key, value) in &self.identity {
            line.insert((*key).into(), Value::from(value.as_str()));
        }

        let encoded = serde_json::to_string(&line).map_err(|_| fmt::Error)?;
        writeln!(writer, "{encoded}")
    }

    fn write_text(&self, writer: &mut Writer<'_>, level: &Level, message: String, fields: Map<String, Value>) -> fmt::Result {
        let short = match *level {
            Level::TRACE => "TRC",
            Level::DEBUG => "DBG",
            Level::INFO => "INF",
            Level::WARN => "WRN",
            _ => "ERR",
        };
        write!(writer, "{} {short} {message}", chrono::Local::now().format("%H:%M:%S"))?;
        for (key, value) in &fields {
            match value {
                Value::String(s) => write!(writer, " {key}={s}")?,
                other => write!(writer, " {key}={other}")?,
            }
        }
        for (key, value) in &self.identity {
            write!(writer, " {key}={value}")?;
        }
        writeln!(writer)
    }
}

impl<S> FormatEvent<S, JsonFields> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, JsonFields>, mut writer: Writer<'_>, event: &Event<'_>) -> fmt::Result {
        let mut fields = Map::new();

        // Outermost span first, so inner spans and the event itself win on clashes.
        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                let extensions = span.extensions();
                let Some(formatted) = extensions.get::<FormattedFields<JsonFields>>() else { continue };
                if let Ok(Value::Object(span_fields)) = serde_json::from_str::<Value>(&formatted.fields) {
                    for (key, value) in span_fields {
                        let value = if is_sensitive_key(&key) { Value::from(MASKED) } else { value };
                        fields.insert(key, value);
                    }
                }
            }
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        fields.extend(visitor.fields);

        let level = event.metadata().level();
        let message = visitor.message.unwrap_or_default();
        if self.json {
            self.write_json(&mut writer, level, message, fields)
        } else {
            self.write_text(&mut writer, level, message, fields)
        }
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        let name = field.name();
        if name == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
            return;
        }
        let value = if is_sensitive_key(name) { Value::from(MASKED) } else { value };
        self.fields.insert(name.to_owned(), value);
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, Value::from(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::from(format!("{value:?}")));
    }
}
