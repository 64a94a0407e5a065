//! Logging façade.
//!
//! Reproduces the exact line format from `log.c`:
//! `YYYY.MM.DD HH:MM:SS LOG<level>[<pid>:<tid>]: <message>`, with the same
//! destination routing: a configured output file wins; otherwise a
//! daemonized POSIX process logs to the system log, and a foreground process
//! logs to standard error. Instrumentation itself is ordinary `tracing`;
//! only the sink and wire format are custom.

use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

use tunnel_config::GlobalOptions;

/// Where log records are routed, chosen once at startup.
#[derive(Debug, Clone)]
pub enum LogDestination {
    File(PathBuf),
    Syslog,
    Stderr,
}

/// Mirrors `log_open()`'s destination choice in `log.c`: an explicit output
/// file always wins; otherwise a daemonized process uses syslog and a
/// foreground process uses stderr.
pub fn resolve_destination(global: &GlobalOptions) -> LogDestination {
    if let Some(path) = &global.output {
        return LogDestination::File(path.clone());
    }
    if global.foreground {
        LogDestination::Stderr
    } else {
        LogDestination::Syslog
    }
}

/// Map a 0-7 syslog-priority debug level to a `tracing` filter.
fn level_for_debug(debug: u8) -> Level {
    match debug {
        0..=3 => Level::ERROR,
        4 => Level::WARN,
        5 => Level::INFO,
        6 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialize the global `tracing` subscriber for the chosen destination.
pub fn init_logging(destination: LogDestination, debug: u8) -> io::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(level_for_debug(debug).into())
        .from_env_lossy();

    match destination {
        LogDestination::File(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let subscriber = tracing_subscriber::fmt()
                .event_format(StunnelFormat)
                .with_writer(Mutex::new(file))
                .with_env_filter(filter)
                .finish();
            subscriber
                .try_init()
                .map_err(|e| io::Error::other(e.to_string()))
        }
        LogDestination::Stderr => {
            let subscriber = tracing_subscriber::fmt()
                .event_format(StunnelFormat)
                .with_writer(io::stderr)
                .with_env_filter(filter)
                .finish();
            subscriber
                .try_init()
                .map_err(|e| io::Error::other(e.to_string()))
        }
        LogDestination::Syslog => {
            let logger = SyslogLayer::new()?;
            tracing_subscriber::registry()
                .with(filter)
                .with(logger)
                .try_init()
                .map_err(|e| io::Error::other(e.to_string()))
        }
    }
}

/// A `FormatEvent` implementation that writes the exact `log.c` line shape.
struct StunnelFormat;

impl<S, N> FormatEvent<S, N> for StunnelFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let now = chrono::Local::now();
        let level = numeric_level(event.metadata().level());
        let pid = std::process::id();
        let tid = thread_id();

        write!(
            writer,
            "{} LOG{}[{}:{}]: ",
            now.format("%Y.%m.%d %H:%M:%S"),
            level,
            pid,
            tid,
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Numeric syslog-style severity, matching `log.c`'s `level` parameter.
fn numeric_level(level: &Level) -> u8 {
    match *level {
        Level::ERROR => 3,
        Level::WARN => 4,
        Level::INFO => 6,
        Level::DEBUG => 7,
        Level::TRACE => 7,
    }
}

/// A crude stand-in for a platform thread id; the supervisor's control path
/// is single-threaded, so this is always the main thread's id truncated to
/// a small integer for display purposes.
fn thread_id() -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish() & 0xffff
}

/// A `tracing_subscriber::Layer` that routes formatted events to syslog,
/// grounded on `daemonbase`'s use of the `syslog` crate for its POSIX sink.
struct SyslogLayer {
    logger: Mutex<syslog::Logger<syslog::LoggerBackend, syslog::Formatter3164>>,
}

impl SyslogLayer {
    fn new() -> io::Result<Self> {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_DAEMON,
            hostname: None,
            process: "tunneld".into(),
            pid: std::process::id(),
        };
        let logger =
            syslog::unix(formatter).map_err(|e| io::Error::other(format!("syslog: {e}")))?;
        Ok(Self {
            logger: Mutex::new(logger),
        })
    }
}

impl<S> tracing_subscriber::Layer<S> for SyslogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        let mut logger = match self.logger.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        let message = visitor.into_message();
        let _ = match *event.metadata().level() {
            Level::ERROR => logger.err(message),
            Level::WARN => logger.warning(message),
            Level::INFO => logger.info(message),
            Level::DEBUG | Level::TRACE => logger.debug(message),
        };
    }
}

/// Collects every field on an event into one `key=value ...` string, since
/// every call site in this crate logs through named fields (`event`,
/// `service`, `peer`, ...) rather than a literal `message` field. Mirrors
/// what `ctx.field_format().format_fields()` does for the file/stderr
/// destinations, without the `tracing_subscriber::fmt` machinery that path
/// relies on (`SyslogLayer` sits on a bare `Layer<S>`, not a `fmt` layer).
#[derive(Default)]
struct FieldVisitor {
    parts: Vec<String>,
}

impl FieldVisitor {
    fn into_message(self) -> String {
        self.parts.join(" ")
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.parts.push(format!("{}={:?}", field.name(), value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.parts.push(format!("{}={value}", field.name()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.parts.push(format!("{}={value}", field.name()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.parts.push(format!("{}={value}", field.name()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.parts.push(format!("{}={value}", field.name()));
    }
}
