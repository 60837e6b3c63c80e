//! Log formatting that shows which logical operation emitted an event.
//!
//! Each thread driven by a scheduler carries its operation id in a
//! thread-local. [`InterleaveFormat`] prints it in place of a wall-clock
//! timestamp, which is meaningless for a serialized run.

use std::cell::Cell;
use std::fmt::{self, Write as _};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

use crate::types::OperationId;

thread_local! {
    static CURRENT_OPERATION: Cell<Option<OperationId>> = const { Cell::new(None) };
}

/// Tag the calling thread with the operation it runs.
pub(crate) fn install_operation(id: OperationId) {
    CURRENT_OPERATION.with(|c| c.set(Some(id)));
}

pub(crate) fn uninstall_operation() {
    CURRENT_OPERATION.with(|c| c.set(None));
}

/// Operation run by the calling thread, if any.
pub fn current_operation() -> Option<OperationId> {
    CURRENT_OPERATION.with(|c| c.get())
}

/// Operation tag for log lines: `[op   3]`, or `[   ---]` outside any
/// operation.
pub struct FmtOp(pub Option<OperationId>);

impl fmt::Display for FmtOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(id) => write!(f, "[op{:>4}]", id.0),
            None => write!(f, "[{:>6}]", "---"),
        }
    }
}

/// Event formatter that prefixes each line with the emitting operation and
/// uses plain colored levels.
pub struct InterleaveFormat;

impl<S, N> FormatEvent<S, N> for InterleaveFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(writer, "{} ", FmtOp(current_operation()))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::ERROR => "\x1b[31m",
                Level::WARN => "\x1b[33m",
                Level::INFO => "\x1b[32m",
                Level::DEBUG => "\x1b[34m",
                Level::TRACE => "\x1b[35m",
            };
            write!(writer, "{color}{level:>5}\x1b[0m ")?;
        } else {
            write!(writer, "{level:>5} ")?;
        }

        let mut fields = EventFields::default();
        event.record(&mut fields);
        writeln!(writer, "{}{}", fields.message, fields.tail)
    }
}

/// Install a subscriber filtered by `RUST_LOG` that uses
/// [`InterleaveFormat`]. Later calls are ignored.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .event_format(InterleaveFormat)
        .try_init();
}

/// Splits an event into its message and a ` key=value` tail, rendered in
/// field order.
#[derive(Default)]
struct EventFields {
    message: String,
    tail: String,
}

impl EventFields {
    fn push(&mut self, field: &Field, value: impl fmt::Display) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.tail, " {}={value}", field.name());
        }
    }
}

impl Visit for EventFields {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, format_args!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value);
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, value);
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn test_fmt_op() {
        assert_eq!(FmtOp(Some(OperationId(3))).to_string(), "[op   3]");
        assert_eq!(FmtOp(Some(OperationId(1234))).to_string(), "[op1234]");
        assert_eq!(FmtOp(None).to_string(), "[   ---]");
    }

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_event_line_layout() {
        let capture = Capture::default();
        let sink = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .event_format(InterleaveFormat)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            install_operation(OperationId(5));
            tracing::info!(iteration = 2u64, strategy = "pct", "attached");
            uninstall_operation();
            tracing::warn!("detached with blocked operations");
        });

        let out = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines,
            [
                "[op   5]  INFO attached iteration=2 strategy=pct",
                "[   ---]  WARN detached with blocked operations",
            ]
        );
    }

    #[test]
    fn test_current_operation_is_per_thread() {
        install_operation(OperationId(9));
        assert_eq!(current_operation(), Some(OperationId(9)));
        std::thread::spawn(|| assert_eq!(current_operation(), None))
            .join()
            .unwrap();
        uninstall_operation();
        assert_eq!(current_operation(), None);
    }
}
