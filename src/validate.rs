use crate::error::ValidationError;
use crate::merge::MergedDocument;
use serde_yaml::Value;

/// Check a merged document before it may replace the live file.
///
/// Parsing the rendered text alone is not enough: the chat id is embedded in
/// a JSON string inside a YAML string, so it is extracted again and compared.
pub fn validate(merged: &MergedDocument, chat_id: &str) -> Result<(), ValidationError> {
    let found = inspect(&merged.rendered)?;
    let expected = chat_id.trim();
    if found != expected {
        return Err(ValidationError::ChatIdMismatch {
            expected: expected.to_string(),
            found,
        });
    }
    Ok(())
}

/// Parse a rendered configuration and return the chat id its webhook
/// template targets.
pub fn inspect(rendered: &str) -> Result<String, ValidationError> {
    if rendered.trim().is_empty() {
        return Err(ValidationError::Empty);
    }
    let doc: Value = serde_yaml::from_str(rendered)
        .map_err(|e| ValidationError::Malformed(e.to_string()))?;
    let map = match &doc {
        Value::Mapping(m) => m,
        Value::Null => return Err(ValidationError::Empty),
        _ => return Err(ValidationError::NotAMapping),
    };

    let template = match map.get("WebhookTemplate") {
        None | Some(Value::Null) => return Err(ValidationError::MissingTemplate),
        Some(Value::String(s)) => s,
        Some(_) => return Err(ValidationError::TemplateNotString),
    };

    let payload: serde_json::Value = serde_json::from_str(template)
        .map_err(|e| ValidationError::TemplateMalformed(e.to_string()))?;
    let chat_id = match payload.get("chat_id") {
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    if chat_id.is_empty() {
        return Err(ValidationError::MissingChatId);
    }
    Ok(chat_id)
}
