use colored::*;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// A tracing event formatter that colors the whole line by severity.
///
/// Runtime diagnostics are read by humans watching many ranks interleave on
/// one terminal, so the formatter prints only the message fields (no
/// timestamps or level tags) and lets the color carry the severity.
pub struct LevelColorFormatter;

impl<S, N> FormatEvent<S, N> for LevelColorFormatter
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
        // Fields are buffered first so the color can wrap the complete line.
        let mut buffer = String::new();
        let mut buf_writer = Writer::new(&mut buffer);
        ctx.format_fields(buf_writer.by_ref(), event)?;

        let colored_line = match *event.metadata().level() {
            Level::INFO => buffer.white(),
            Level::WARN => buffer.yellow(),
            Level::ERROR => buffer.red(),
            Level::DEBUG => buffer.blue(),
            Level::TRACE => buffer.purple(),
        };

        writeln!(writer, "{}", colored_line)
    }
}

/// Installs the global tracing subscriber with the colorized formatter.
///
/// The filter honors `RUST_LOG` and defaults to `info`. Safe to call more
/// than once: only the first installation wins, later calls are ignored
/// (useful because every integration-test binary calls it).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(LevelColorFormatter)
        .try_init();
}
