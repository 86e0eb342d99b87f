use crate::OutputFormat;
use span_types::Span;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Writes consumed spans to stdout and counts them.
///
/// Called concurrently from every claim; each span is written with a single
/// locked write so lines never interleave.
#[derive(Debug)]
pub struct SpanPrinter {
    format: OutputFormat,
    handled: AtomicU64,
}

impl SpanPrinter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            handled: AtomicU64::new(0),
        }
    }

    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    pub fn print(&self, span: &Span) {
        self.handled.fetch_add(1, Ordering::Relaxed);

        let Some(line) = self.render(span) else {
            return;
        };
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{line}") {
            warn!("Failed to write span {}: {e}", span.id);
        }
    }

    /// The line written for `span`, if any.
    pub fn render(&self, span: &Span) -> Option<String> {
        match self.format {
            OutputFormat::None => None,
            OutputFormat::Json => match serde_json::to_string(span) {
                Ok(line) => Some(line),
                Err(e) => {
                    warn!("Failed to serialize span {}: {e}", span.id);
                    None
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use span_types::{Id, TimeDelta, Timestamp, Timings};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn span() -> Span {
        Span {
            id: Id::from_u64(0xab),
            parent: Id::default(),
            trace: Id::from_u64(0xcd),
            name: Arc::from("authorize"),
            service: Arc::from("payments"),
            timestamp: Timestamp(1_000),
            duration: TimeDelta::nanoseconds(250),
            timings: Timings::default(),
            tags: HashMap::from([(Arc::from("region"), Arc::from("eu-west-1"))]),
        }
    }

    #[test]
    fn test_json_line() {
        let printer = SpanPrinter::new(OutputFormat::Json);
        let line = printer.render(&span()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert!(!line.contains('\n'));
        assert_eq!(value["id"], "00000000000000ab");
        assert_eq!(value["trace"], "00000000000000cd");
        assert_eq!(value["service"], "payments");
        assert_eq!(value["duration"], 250);
        assert_eq!(value["tags"]["region"], "eu-west-1");
    }

    #[test]
    fn test_none_format_renders_nothing_but_counts() {
        let printer = SpanPrinter::new(OutputFormat::None);
        assert_eq!(printer.render(&span()), None);

        printer.print(&span());
        printer.print(&span());
        assert_eq!(printer.handled(), 2);
    }
}
