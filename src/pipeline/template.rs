//! Message templating with `{{.Field}}` placeholders.
//!
//! Only field references (and `{{/* comments */}}`) are understood. Trim
//! markers `{{-` / `-}}` strip adjacent whitespace. A template that fails to
//! parse or execute renders as its own raw text.

use tracing::warn;

use crate::error::TemplateError;
use crate::pipeline::types::FieldMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    /// `.A.B.C` as `["A", "B", "C"]`.
    Field(Vec<String>),
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut rest = source;
        let mut offset = 0;
        let mut trim_next = false;

        while let Some(open) = rest.find("{{") {
            let before = &rest[..open];
            text.push_str(if trim_next { before.trim_start() } else { before });

            let after_open = &rest[open + 2..];
            let Some(close) = after_open.find("}}") else {
                return Err(TemplateError::Unclosed(offset + open));
            };
            let mut action = &after_open[..close];

            if let Some(stripped) = action.strip_prefix("- ") {
                let trimmed_len = text.trim_end().len();
                text.truncate(trimmed_len);
                action = stripped;
            }
            trim_next = false;
            if let Some(stripped) = action.strip_suffix(" -") {
                trim_next = true;
                action = stripped;
            }

            if let Some(segment) = parse_action(action.trim())? {
                if !text.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut text)));
                }
                segments.push(segment);
            }

            let consumed = open + 2 + close + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }

        text.push_str(if trim_next { rest.trim_start() } else { rest });
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }

        Ok(Self { segments })
    }

    /// Substitute fields. Unknown fields render as empty.
    pub fn execute(&self, fields: &FieldMap) -> Result<String, TemplateError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Field(path) => match path.as_slice() {
                    [name] => {
                        if let Some(value) = fields.get(name) {
                            out.push_str(value);
                        }
                    }
                    // Values are plain strings; they have no fields.
                    [_, field, ..] => {
                        return Err(TemplateError::FieldOnString {
                            field: field.clone(),
                        });
                    }
                    [] => {}
                },
            }
        }
        Ok(out)
    }
}

/// Returns `None` for actions that produce no output (comments).
fn parse_action(action: &str) -> Result<Option<Segment>, TemplateError> {
    if action.starts_with("/*") && action.ends_with("*/") {
        return Ok(None);
    }

    let unsupported = || TemplateError::Unsupported(action.to_string());
    let Some(path) = action.strip_prefix('.') else {
        return Err(unsupported());
    };

    let parts: Vec<String> = path.split('.').map(str::to_string).collect();
    let valid = parts
        .iter()
        .all(|p| !p.is_empty() && p.chars().all(|c| c.is_alphanumeric() || c == '_'));
    if !valid {
        return Err(unsupported());
    }
    Ok(Some(Segment::Field(parts)))
}

/// Render `template` with `fields`, falling back to the raw template on error.
pub fn render(template: &str, fields: &FieldMap) -> String {
    match Template::parse(template).and_then(|t| t.execute(fields)) {
        Ok(rendered) => rendered,
        Err(e) => {
            warn!(error = %e, "Template render failed, using raw template");
            template.to_string()
        }
    }
}
