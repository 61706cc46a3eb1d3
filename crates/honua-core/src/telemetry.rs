use std::fmt as StdFmt;
use std::sync::OnceLock;

use chrono::Utc;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::Subscriber;
use tracing::field::{Field, Visit};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::{self, FmtContext, FormattedFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::{AppConfig, TelemetryConfig};

static INSTALLED: OnceLock<()> = OnceLock::new();

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to set tracing subscriber: {0}")]
    SubscriberInit(String),
    #[error("invalid log filter: {0}")]
    Filter(String),
}

/// Initialize structured logging. `RUST_LOG` wins over the configured filter,
/// which falls back to `info`. JSON output is used outside dev; pretty output
/// for dev. Calling this more than once is a no-op.
pub fn init_telemetry(app: &AppConfig, telemetry: &TelemetryConfig) -> Result<(), TelemetryError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    let env_filter = build_filter(telemetry)?;

    let json_format = !app.env.eq_ignore_ascii_case("dev");
    if json_format {
        let fmt_layer = fmt::layer().event_format(JsonLogFormatter::new(&app.service_name));
        install_subscriber(fmt_layer, env_filter)
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .pretty()
            .with_writer(std::io::stderr);
        install_subscriber(fmt_layer, env_filter)
    }
}

fn build_filter(telemetry: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directives = telemetry.log_filter.as_deref().unwrap_or("info");
    EnvFilter::try_new(directives).map_err(|err| TelemetryError::Filter(err.to_string()))
}

fn install_subscriber(
    fmt_layer: impl tracing_subscriber::Layer<Registry> + Send + Sync + 'static,
    env_filter: EnvFilter,
) -> Result<(), TelemetryError> {
    let subscriber = Registry::default().with(fmt_layer).with(env_filter);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| TelemetryError::SubscriberInit(err.to_string()))?;
    let _ = INSTALLED.set(());
    Ok(())
}

/// One JSON object per line: timestamp, level, service, target, the current
/// span and its ancestors (with their recorded fields), and the event's own
/// fields.
struct JsonLogFormatter {
    service: String,
}

impl JsonLogFormatter {
    fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl<S, N> FormatEvent<S, N> for JsonLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> StdFmt::Result {
        let mut fields = JsonFields::default();
        event.record(&mut fields);

        let spans: Vec<Value> = ctx
            .event_scope()
            .map(|scope| {
                scope
                    .from_root()
                    .map(|span| {
                        let recorded = span
                            .extensions()
                            .get::<FormattedFields<N>>()
                            .map(|formatted| formatted.fields.clone())
                            .unwrap_or_default();
                        json!({ "name": span.name(), "fields": recorded })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let metadata = event.metadata();
        let payload = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": metadata.level().as_str().to_lowercase(),
            "service": self.service,
            "target": metadata.target(),
            "span": ctx.lookup_current().map(|span| span.name()),
            "spans": spans,
            "fields": fields.0,
        });

        let line = serde_json::to_string(&payload).map_err(|_| StdFmt::Error)?;
        writer.write_str(&line)?;
        writer.write_str("\n")
    }
}

/// Event fields collected as JSON values. Numbers and booleans keep their
/// type; wide integers and everything else are rendered as strings.
#[derive(Default)]
struct JsonFields(Map<String, Value>);

impl JsonFields {
    fn put(&mut self, field: &Field, value: impl Into<Value>) {
        self.0.insert(field.name().to_string(), value.into());
    }
}

impl Visit for JsonFields {
    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value);
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value);
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value);
    }

    fn record_i128(&mut self, field: &Field, value: i128) {
        self.put(field, value.to_string());
    }

    fn record_u128(&mut self, field: &Field, value: u128) {
        self.put(field, value.to_string());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value);
    }

    fn record_debug(&mut self, field: &Field, value: &dyn StdFmt::Debug) {
        self.put(field, format!("{value:?}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    static INIT_GUARD: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().expect("lock buffer").clone()).expect("utf8 output")
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("lock buffer").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn telemetry_init_is_idempotent() {
        let _guard = INIT_GUARD.lock().expect("lock init");
        let app = AppConfig {
            service_name: "honua".into(),
            port: 0,
            env: "prod".into(),
        };
        let telemetry = TelemetryConfig {
            log_filter: Some("honua_core=debug".into()),
        };

        init_telemetry(&app, &telemetry).expect("telemetry initializes");
        init_telemetry(&app, &telemetry).expect("second init is a no-op");

        let dev = AppConfig {
            env: "dev".into(),
            ..app
        };
        init_telemetry(&dev, &TelemetryConfig::default()).expect("later init is a no-op");
    }

    #[test]
    fn json_formatter_includes_span_scope_and_fields() {
        let buffer = SharedBuffer::default();
        let writer = {
            let buffer = buffer.clone();
            move || buffer.clone()
        };

        let fmt_layer = fmt::layer()
            .event_format(JsonLogFormatter::new("honua-test"))
            .with_writer(writer);
        let subscriber = Registry::default().with(fmt_layer);

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("add_rule", tenant = "t1");
            let _guard = span.enter();
            tracing::info!(rule_id = 3, message = "rule stored");
        });

        let output = buffer.contents();
        let line = output.lines().next().expect("log line");
        let payload: serde_json::Value = serde_json::from_str(line).expect("json line");

        assert_eq!(payload["level"], "info");
        assert_eq!(payload["service"], "honua-test");
        assert_eq!(payload["span"], "add_rule");
        assert_eq!(payload["spans"][0]["name"], "add_rule");
        assert!(
            payload["spans"][0]["fields"]
                .as_str()
                .expect("span fields string")
                .contains("t1"),
            "span fields should carry the tenant"
        );
        assert_eq!(payload["fields"]["rule_id"], 3);
        assert_eq!(payload["fields"]["message"], "rule stored");

        let ts = payload["timestamp"]
            .as_str()
            .expect("timestamp string present");
        let looks_rfc3339 = ts.contains('T') && (ts.ends_with('Z') || ts.ends_with("+00:00"));
        assert!(looks_rfc3339, "timestamp should be RFC3339, got {ts}");
    }
}
