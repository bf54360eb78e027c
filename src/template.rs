//! `${name}` placeholder resolution for request templates.
//!
//! Request URLs, header values and bodies may reference variables from the
//! `[variables]` config table, plus two built-ins evaluated per request:
//! `${uuid}` (a fresh v4 UUID) and `${timestamp}` (Unix milliseconds).

use chrono::Utc;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unterminated placeholder at byte {offset}")]
    Unterminated { offset: usize },
}

/// Expands placeholders in a template string.
pub trait PlaceholderResolver: Send + Sync {
    fn resolve(&self, template: &str) -> Result<String, TemplateError>;
}

/// Resolver backed by a fixed variable table plus the built-ins.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use stresslab::template::{PlaceholderResolver, VariableResolver};
///
/// let resolver = VariableResolver::new(BTreeMap::from([
///     ("host".to_string(), "api.local".to_string()),
/// ]));
/// assert_eq!(
///     resolver.resolve("http://${host}/items").unwrap(),
///     "http://api.local/items"
/// );
/// ```
#[derive(Debug, Clone, Default)]
pub struct VariableResolver {
    variables: BTreeMap<String, String>,
}

impl VariableResolver {
    pub fn new(variables: BTreeMap<String, String>) -> Self {
        Self { variables }
    }

    fn lookup(&self, name: &str) -> Option<String> {
        if let Some(value) = self.variables.get(name) {
            return Some(value.clone());
        }
        match name {
            "uuid" => Some(Uuid::new_v4().to_string()),
            "timestamp" => Some(Utc::now().timestamp_millis().to_string()),
            _ => None,
        }
    }
}

impl PlaceholderResolver for VariableResolver {
    fn resolve(&self, template: &str) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        let mut consumed = 0;

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find('}').ok_or(TemplateError::Unterminated {
                offset: consumed + start,
            })?;
            let advance = start + 2 + end + 1;
            match self.lookup(after[..end].trim()) {
                Some(value) => out.push_str(&value),
                None => out.push_str(&rest[start..advance]),
            }
            consumed += advance;
            rest = &rest[advance..];
        }
        out.push_str(rest);
        Ok(out)
    }
}
