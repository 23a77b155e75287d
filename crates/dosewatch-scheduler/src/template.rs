//! Notification templates — `{{placeholder}}` substitution, compiled once at startup.
//!
//! Supported placeholders:
//! - `{{last_dose_at}}` — when the last dose was taken
//! - `{{next_dose_at}}` — when the next dose is/was due
//! - `{{treatment_type}}` — e.g. "injection"
//! - `{{overdue}}` — how long past due, e.g. "1h 5m"
//!
//! Parsing is strict: an unknown or unterminated placeholder is a startup
//! error, never a per-tick one.

use std::fmt::Write as _;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use dosewatch_core::{DoseError, NotificationTemplateData, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    LastDoseAt,
    NextDoseAt,
    TreatmentType,
    Overdue,
}

impl Field {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "last_dose_at" => Some(Field::LastDoseAt),
            "next_dose_at" => Some(Field::NextDoseAt),
            "treatment_type" => Some(Field::TreatmentType),
            "overdue" => Some(Field::Overdue),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Field(Field),
}

/// A compiled template.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Compile `source`. `name` is only used in error messages.
    pub fn parse(name: &str, source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(open) = rest.find("{{") {
            let text = &rest[..open];
            if text.contains("}}") {
                return Err(DoseError::Template(format!("{name}: unmatched '}}}}'")));
            }
            if !text.is_empty() {
                segments.push(Segment::Text(text.to_string()));
            }

            let after = &rest[open + 2..];
            let close = after.find("}}").ok_or_else(|| {
                DoseError::Template(format!("{name}: unterminated '{{{{' at byte {}", source.len() - rest.len() + open))
            })?;
            let key = after[..close].trim();
            if key.is_empty() {
                return Err(DoseError::Template(format!("{name}: empty placeholder")));
            }
            let field = Field::parse(key).ok_or_else(|| {
                DoseError::Template(format!("{name}: unknown placeholder '{key}'"))
            })?;
            segments.push(Segment::Field(field));
            rest = &after[close + 2..];
        }

        if rest.contains("}}") {
            return Err(DoseError::Template(format!("{name}: unmatched '}}}}'")));
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            segments,
        })
    }

    /// Substitute `data` into the template.
    pub fn render(&self, data: &NotificationTemplateData, time_format: Option<&str>) -> Result<String> {
        let mut out = String::new();
        for segment in &self.segments {
            let written = match segment {
                Segment::Text(text) => out.write_str(text),
                Segment::Field(Field::LastDoseAt) => write_time(&mut out, data.last_dose_at, time_format),
                Segment::Field(Field::NextDoseAt) => write_time(&mut out, data.next_dose_at, time_format),
                Segment::Field(Field::TreatmentType) => write!(out, "{}", data.treatment_type),
                Segment::Field(Field::Overdue) => out.write_str(&humanize(data.overdue)),
            };
            written.map_err(|_| DoseError::Template(format!("{}: failed to render", self.name)))?;
        }
        Ok(out)
    }
}

fn write_time(out: &mut String, t: DateTime<Utc>, format: Option<&str>) -> std::fmt::Result {
    match format {
        Some(f) => write!(out, "{}", t.format(f)),
        None => out.write_str(&t.to_rfc3339_opts(SecondsFormat::Secs, true)),
    }
}

/// "2d 3h", "1h 5m", "12m"; anything under a minute is "0m".
fn humanize(d: Duration) -> String {
    let d = if d < Duration::zero() { Duration::zero() } else { d };
    let days = d.num_days();
    let hours = d.num_hours() % 24;
    let minutes = d.num_minutes() % 60;
    match (days, hours) {
        (0, 0) => format!("{minutes}m"),
        (0, _) => format!("{hours}h {minutes}m"),
        _ => format!("{days}d {hours}h"),
    }
}

/// Title and message templates plus the timestamp format they share.
#[derive(Debug, Clone)]
pub struct NotificationTemplates {
    title: Template,
    message: Template,
    time_format: Option<String>,
}

impl NotificationTemplates {
    /// Compile both templates and validate the time format.
    pub fn parse(title: &str, message: &str, time_format: Option<&str>) -> Result<Self> {
        if let Some(f) = time_format
            && StrftimeItems::new(f).any(|item| matches!(item, Item::Error))
        {
            return Err(DoseError::Template(format!("invalid time_format '{f}'")));
        }
        Ok(Self {
            title: Template::parse("title", title)?,
            message: Template::parse("message", message)?,
            time_format: time_format.map(str::to_string),
        })
    }

    /// Render `(title, message)`.
    pub fn render(&self, data: &NotificationTemplateData) -> Result<(String, String)> {
        let tf = self.time_format.as_deref();
        Ok((self.title.render(data, tf)?, self.message.render(data, tf)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dosewatch_core::TreatmentType;

    fn data() -> NotificationTemplateData {
        NotificationTemplateData {
            last_dose_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            next_dose_at: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            treatment_type: TreatmentType::Gel,
            overdue: Duration::minutes(65),
        }
    }

    #[test]
    fn test_render_all_fields() {
        let t = Template::parse(
            "message",
            "{{treatment_type}} last {{ last_dose_at }}, due {{next_dose_at}} ({{overdue}} ago)",
        )
        .unwrap();
        assert_eq!(
            t.render(&data(), None).unwrap(),
            "gel last 2024-01-01T00:00:00Z, due 2024-01-02T00:00:00Z (1h 5m ago)"
        );
    }

    #[test]
    fn test_render_with_time_format() {
        let templates =
            NotificationTemplates::parse("Dose: {{treatment_type}}", "due {{next_dose_at}}", Some("%d %b %H:%M"))
                .unwrap();
        let (title, message) = templates.render(&data()).unwrap();
        assert_eq!(title, "Dose: gel");
        assert_eq!(message, "due 02 Jan 00:00");
    }

    #[test]
    fn test_plain_text_passes_through() {
        let t = Template::parse("title", "hi cutie! <3").unwrap();
        assert_eq!(t.render(&data(), None).unwrap(), "hi cutie! <3");
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["{{nope}}", "{{last_dose_at", "oops }}", "{{}}", "{{ }} text"] {
            let err = Template::parse("title", bad).unwrap_err();
            assert!(matches!(err, DoseError::Template(_)), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_invalid_time_format_rejected() {
        let err = NotificationTemplates::parse("a", "b", Some("%Q")).unwrap_err();
        assert!(matches!(err, DoseError::Template(_)));
    }

    #[test]
    fn test_humanize() {
        assert_eq!(humanize(Duration::seconds(30)), "0m");
        assert_eq!(humanize(Duration::minutes(12)), "12m");
        assert_eq!(humanize(Duration::hours(26)), "1d 2h");
        assert_eq!(humanize(Duration::hours(-3)), "0m");
    }
}
