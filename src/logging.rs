use crate::config::{LogFormat, LogOutputType, LogTarget, LoggingConfig};
use chrono::{DateTime, SecondsFormat, Utc};
use http::header::{self, HeaderMap};
use http::{Method, Request, Uri};
use serde_json::{json, Map, Value};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::sync::Mutex;

/// Key-value details of one failed backend request.
pub type LogDetails = Map<String, Value>;

/// The parts of a backend request that are kept for logging once the request
/// itself has been handed to the client.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub method: Method,
    pub uri: Uri,
    /// `Host` header, empty when absent or not valid text.
    pub host: String,
    /// `X-Varnish` header, empty when absent.
    pub varnish_id: String,
}

impl BackendRequest {
    pub fn from_request<B>(req: &Request<B>) -> Self {
        Self {
            method: req.method().clone(),
            uri: req.uri().clone(),
            host: header_string(req.headers(), header::HOST),
            varnish_id: header_string(req.headers(), "x-varnish"),
        }
    }

    /// Adds the request context to `details`, named from the backend's side.
    pub fn annotate(&self, details: &mut LogDetails) {
        let upstream_addr = match self.host.as_str() {
            "" => self.uri.authority().map(|a| a.to_string()).unwrap_or_default(),
            host => host.to_string(),
        };
        details.insert("upstream_addr".into(), Value::from(upstream_addr));
        details.insert("request_method".into(), Value::from(self.method.as_str()));
        details.insert(
            "request".into(),
            Value::from(format!("{} {}", self.method, self.uri)),
        );
        details.insert("varnish_id".into(), Value::from(self.varnish_id.as_str()));
    }
}

fn header_string(headers: &HeaderMap, name: impl header::AsHeaderName) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Receives one call per failed backend request, after the response status
/// for that failure has been decided.
pub trait BackendLogger: Send + Sync {
    fn log_from_backend_request(&self, details: LogDetails, req: &BackendRequest);
}

/// Writes each failure as a single JSON object per line.
pub struct JsonBackendLogger {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
}

impl JsonBackendLogger {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub fn from_target(target: &LogTarget) -> Result<Self, Box<dyn std::error::Error>> {
        let writer: Box<dyn Write + Send> = match target.output_type {
            LogOutputType::Stdout => Box::new(std::io::stdout()),
            LogOutputType::File => {
                let path = target.path.as_ref()
                    .ok_or("File output type requires path")?;
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                Box::new(file)
            }
        };
        Ok(Self::new(writer))
    }

    fn format_entry(mut details: LogDetails, req: &BackendRequest, now: DateTime<Utc>) -> String {
        req.annotate(&mut details);
        details.insert(
            "@timestamp".into(),
            Value::from(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        Value::Object(details).to_string()
    }
}

impl BackendLogger for JsonBackendLogger {
    fn log_from_backend_request(&self, details: LogDetails, req: &BackendRequest) {
        let line = Self::format_entry(details, req, Utc::now());
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{}", line);
            let _ = writer.flush();
        }
    }
}

/// Sends failures through the `log` facade instead of a dedicated sink.
pub struct LogLogger;

impl BackendLogger for LogLogger {
    fn log_from_backend_request(&self, mut details: LogDetails, req: &BackendRequest) {
        req.annotate(&mut details);
        log::warn!(target: "backend", "{}", Value::Object(details));
    }
}

/// Picks the backend failure logger described by the logging config.
pub fn backend_logger(
    config: Option<&LoggingConfig>,
) -> Result<Box<dyn BackendLogger>, Box<dyn std::error::Error>> {
    let target = config.and_then(|c| c.target.as_ref());
    match target {
        Some(target) => Ok(Box::new(JsonBackendLogger::from_target(target)?)),
        None => Ok(Box::new(LogLogger)),
    }
}

/// Initialises env_logger for diagnostics, in text or JSON lines.
pub fn init_fallback(log_level: Option<&str>, log_format: Option<&LogFormat>) {
    let level = log_level.unwrap_or("info");
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));

    if let Some(LogFormat::Json) = log_format {
        builder.format(|buf, record| {
            let timestamp: DateTime<Utc> = Utc::now();
            let log_entry = json!({
                "timestamp": timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
                "level": record.level().to_string().to_lowercase(),
                "target": record.target(),
                "message": record.args().to_string(),
            });
            writeln!(buf, "{}", log_entry)
        });
    }

    let _ = builder.try_init();
}
