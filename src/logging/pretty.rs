use nu_ansi_term::{Color, Style};
use std::fmt::Debug;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Console format for development, highlighting request log records.
pub struct PrettyRequestLogFormat;

macro_rules! styled {
    ($writer:expr, $style:expr, $block:block) => {
        let style = $style;
        write!($writer, "{}", style.prefix())?;
        $block;
        write!($writer, "{}", style.suffix())?;
    };
}

#[derive(Default)]
struct EventFields {
    message: String,
    attrs: Option<String>,
    other: Vec<String>,
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "attrs" => self.attrs = Some(value.to_string()),
            name => self.other.push(format!("{}={}", name, value)),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        match field.name() {
            "message" => self.message = format!("{:?}", value),
            "attrs" => self.attrs = Some(format!("{:?}", value)),
            name => self.other.push(format!("{}={:?}", name, value)),
        }
    }
}

impl PrettyRequestLogFormat {
    fn level_style(level: &Level) -> Style {
        match *level {
            Level::TRACE => Style::new().fg(Color::Purple),
            Level::DEBUG => Style::new().fg(Color::Blue),
            Level::INFO => Style::new().fg(Color::Green),
            Level::WARN => Style::new().fg(Color::Yellow),
            Level::ERROR => Style::new().fg(Color::Red),
        }
    }

    fn format_timestamp(writer: &mut Writer<'_>) -> std::fmt::Result {
        styled!(writer, Style::new().dimmed(), {
            write!(writer, "{} ", chrono::offset::Local::now().format("%T%.3f"))?;
        });

        Ok(())
    }

    fn format_level(writer: &mut Writer<'_>, level: &Level) -> std::fmt::Result {
        styled!(writer, Self::level_style(level), {
            write!(writer, "{:<5} ", level)?;
        });

        Ok(())
    }

    fn format_message(
        writer: &mut Writer<'_>,
        event: &Event<'_>,
        fields: &EventFields,
    ) -> std::fmt::Result {
        let metadata = event.metadata();

        // Request records carry the summary line as message; keep it prominent.
        if fields.attrs.is_some() {
            styled!(writer, Self::level_style(metadata.level()).bold(), {
                write!(writer, "{}", fields.message)?;
            });
        } else {
            styled!(writer, Style::new().dimmed(), {
                write!(writer, "{}: ", metadata.target())?;
            });
            write!(writer, "{}", fields.message)?;
        }

        for field in &fields.other {
            write!(writer, " {}", field)?;
        }

        Ok(())
    }
}

impl<S, N> FormatEvent<S, N> for PrettyRequestLogFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let mut fields = EventFields::default();
        event.record(&mut fields);

        Self::format_timestamp(&mut writer)?;
        Self::format_level(&mut writer, event.metadata().level())?;
        Self::format_message(&mut writer, event, &fields)?;

        if let Some(attrs) = &fields.attrs {
            styled!(writer, Style::new().dimmed(), {
                write!(writer, " {}", attrs)?;
            });
        }

        writeln!(writer)
    }
}
