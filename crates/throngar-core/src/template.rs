//! `{{path}}` template substitution.
//!
//! The teacher's `extractors::substitute_variables` scans for `${name}`
//! placeholders and leaves unresolved ones verbatim. This engine keeps the
//! same char-by-char scanner shape but targets `{{`/`}}` delimiters, resolves
//! dotted paths against a layered context, and errors on anything it can't
//! resolve instead of passing it through.

use crate::error::ThrongarError;
use serde_json::Value;
use std::collections::HashMap;

/// Layered lookup context, consulted in priority order: extracted data,
/// then scenario/global variables, then the active CSV row, then faker
/// categories, then built-ins (`__VU`, `__ITER`, `timestamp`).
pub struct TemplateContext<'a> {
    pub extracted: &'a HashMap<String, Value>,
    pub variables: &'a HashMap<String, Value>,
    pub csv_row: Option<&'a HashMap<String, String>>,
    pub vu_id: u32,
    pub iteration: u64,
}

impl<'a> TemplateContext<'a> {
    fn resolve(&self, path: &str) -> Option<Value> {
        if let Some(v) = lookup_path(self.extracted, path) {
            return Some(v);
        }
        if let Some(v) = lookup_path(self.variables, path) {
            return Some(v);
        }
        if let Some(row) = self.csv_row {
            if let Some(v) = row.get(path) {
                return Some(Value::String(v.clone()));
            }
        }
        if let Some(rest) = path.strip_prefix("faker.") {
            return crate::providers::faker::resolve(rest).map(Value::String);
        }
        match path {
            "__VU" => Some(Value::Number(self.vu_id.into())),
            "__ITER" => Some(Value::Number(self.iteration.into())),
            "timestamp" => Some(Value::Number(
                chrono::Utc::now().timestamp_millis().into(),
            )),
            _ => None,
        }
    }
}

fn lookup_path(map: &HashMap<String, Value>, path: &str) -> Option<Value> {
    let mut parts = path.split('.');
    let head = parts.next()?;
    let mut current = map.get(head)?.clone();
    for part in parts {
        current = match current {
            Value::Object(ref obj) => obj.get(part)?.clone(),
            _ => return None,
        };
    }
    Some(current)
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        _ => v.to_string(),
    }
}

/// Substitute every `{{path}}` placeholder in `input`, returning an error
/// naming the first unresolved path encountered.
pub fn substitute(input: &str, ctx: &TemplateContext) -> Result<String, ThrongarError> {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            let close = input[i..].find("}}").map(|p| i + p);
            match close {
                Some(close) => {
                    let path = input[i + 2..close].trim();
                    match ctx.resolve(path) {
                        Some(v) => out.push_str(&value_to_string(&v)),
                        None => {
                            return Err(ThrongarError::TemplateError(format!(
                                "unresolved template reference '{{{{{path}}}}}'"
                            )))
                        }
                    }
                    i = close + 2;
                    continue;
                }
                None => {
                    out.push_str(&input[i..]);
                    break;
                }
            }
        }
        let ch_len = input[i..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
        out.push_str(&input[i..i + ch_len]);
        i += ch_len;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(
        extracted: &'a HashMap<String, Value>,
        variables: &'a HashMap<String, Value>,
    ) -> TemplateContext<'a> {
        TemplateContext {
            extracted,
            variables,
            csv_row: None,
            vu_id: 3,
            iteration: 7,
        }
    }

    #[test]
    fn substitutes_variable() {
        let extracted = HashMap::new();
        let mut variables = HashMap::new();
        variables.insert("base_url".to_string(), Value::String("http://x".into()));
        let out = substitute("{{base_url}}/ping", &ctx(&extracted, &variables)).unwrap();
        assert_eq!(out, "http://x/ping");
    }

    #[test]
    fn extracted_data_takes_priority_over_variables() {
        let mut extracted = HashMap::new();
        extracted.insert("token".to_string(), Value::String("from-extract".into()));
        let mut variables = HashMap::new();
        variables.insert("token".to_string(), Value::String("from-var".into()));
        let out = substitute("{{token}}", &ctx(&extracted, &variables)).unwrap();
        assert_eq!(out, "from-extract");
    }

    #[test]
    fn builtin_vu_and_iter() {
        let extracted = HashMap::new();
        let variables = HashMap::new();
        let out = substitute("vu={{__VU}} iter={{__ITER}}", &ctx(&extracted, &variables)).unwrap();
        assert_eq!(out, "vu=3 iter=7");
    }

    #[test]
    fn unresolved_reference_errors() {
        let extracted = HashMap::new();
        let variables = HashMap::new();
        let err = substitute("{{missing}}", &ctx(&extracted, &variables)).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn dotted_path_into_nested_extracted_object() {
        let mut extracted = HashMap::new();
        extracted.insert(
            "user".to_string(),
            serde_json::json!({"id": "42", "name": "ada"}),
        );
        let variables = HashMap::new();
        let out = substitute("{{user.id}}", &ctx(&extracted, &variables)).unwrap();
        assert_eq!(out, "42");
    }
}
