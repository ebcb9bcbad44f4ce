//! Log line templates.
//!
//! A template is plain text with placeholders for the event fields. Both the
//! brace style (`{timestamp} {level} {message}`) and the printf-like style
//! inherited from older deployments (`%(asctime)s %(levelname)s %(message)s`)
//! are accepted. `{{`, `}}` and `%%` escape the delimiters.

use std::fmt;
use std::str::FromStr;

use strum::{Display, EnumString};

use crate::error::ConfigError;

/// Event fields a template can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum LogField {
    /// Event timestamp.
    #[strum(to_string = "timestamp", serialize = "asctime")]
    Timestamp,
    /// Event level, for example `INFO`.
    #[strum(to_string = "level", serialize = "levelname")]
    Level,
    /// Event target, usually the emitting module.
    #[strum(to_string = "target", serialize = "name")]
    Target,
    /// Event message and structured fields.
    Message,
}

/// One piece of a parsed log template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSegment {
    /// Text copied verbatim.
    Literal(String),
    /// A placeholder replaced by an event field.
    Field(LogField),
}

/// A validated log line template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTemplate {
    source: String,
    segments: Vec<TemplateSegment>,
}

impl LogTemplate {
    /// Parses a template, rejecting unknown placeholders.
    pub fn parse(template: &str) -> Result<Self, ConfigError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = template;

        while !rest.is_empty() {
            if let Some(tail) = rest.strip_prefix("{{") {
                literal.push('{');
                rest = tail;
            } else if let Some(tail) = rest.strip_prefix("}}") {
                literal.push('}');
                rest = tail;
            } else if let Some(tail) = rest.strip_prefix("%%") {
                literal.push('%');
                rest = tail;
            } else if let Some(tail) = rest.strip_prefix('{') {
                let (name, after) = tail
                    .split_once('}')
                    .ok_or_else(|| invalid(template, "unterminated '{' placeholder"))?;
                flush_literal(&mut literal, &mut segments);
                segments.push(placeholder(template, name)?);
                rest = after;
            } else if let Some(tail) = rest.strip_prefix("%(") {
                let (name, after) = tail
                    .split_once(")s")
                    .ok_or_else(|| invalid(template, "unterminated '%(' placeholder"))?;
                flush_literal(&mut literal, &mut segments);
                segments.push(placeholder(template, name)?);
                rest = after;
            } else {
                let mut chars = rest.chars();
                if let Some(ch) = chars.next() {
                    literal.push(ch);
                }
                rest = chars.as_str();
            }
        }
        flush_literal(&mut literal, &mut segments);

        if !segments.contains(&TemplateSegment::Field(LogField::Message)) {
            return Err(invalid(template, "template never renders the message"));
        }
        Ok(Self {
            source: template.to_owned(),
            segments,
        })
    }

    /// The parsed segments in render order.
    #[must_use]
    pub fn segments(&self) -> &[TemplateSegment] {
        &self.segments
    }

    /// The template as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for LogTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn flush_literal(literal: &mut String, segments: &mut Vec<TemplateSegment>) {
    if !literal.is_empty() {
        segments.push(TemplateSegment::Literal(std::mem::take(literal)));
    }
}

fn placeholder(template: &str, raw: &str) -> Result<TemplateSegment, ConfigError> {
    let name = raw.trim();
    LogField::from_str(name)
        .map(TemplateSegment::Field)
        .map_err(|_| invalid(template, &format!("unknown placeholder '{name}'")))
}

fn invalid(template: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidLogTemplate {
        template: template.to_owned(),
        reason: reason.to_owned(),
    }
}
