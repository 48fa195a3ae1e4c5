//! Request payloads built from node parameters.

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::multipart::{Form, Part};
use serde_json::{Map, Value};

use crate::{
    CallflowError, Result,
    model::FileMeta,
    template::{
        reference::{self, ResultSource},
        url,
    },
};

/// Parameter key that requests the run's uploaded file to be attached.
/// A string value names the form field, otherwise the field is `file`.
pub const FILE_KEY: &str = "file";
/// Marks an inline binary value: `{"$binary": "<base64>", "filename": .., "contentType": ..}`.
pub const BINARY_KEY: &str = "$binary";

const DEFAULT_FILE_FIELD: &str = "file";
const DEFAULT_FILENAME: &str = "upload";

/// Body or query data for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Map<String, Value>),
    Form(FormPayload),
}

impl Payload {
    pub fn is_form(&self) -> bool {
        matches!(self, Payload::Form(_))
    }

    pub fn as_json(&self) -> Option<&Map<String, Value>> {
        match self {
            Payload::Json(map) => Some(map),
            Payload::Form(_) => None,
        }
    }
}

/// Flattened multipart form. Kept as plain data so it can be rebuilt for every attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormPayload {
    pub fields: Vec<FormField>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormField {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        filename: String,
        content_type: Option<String>,
        data: Vec<u8>,
    },
}

impl FormField {
    pub fn name(&self) -> &str {
        match self {
            FormField::Text {
                name, ..
            }
            | FormField::File {
                name, ..
            } => name,
        }
    }
}

impl FormPayload {
    pub fn field(
        &self,
        name: &str,
    ) -> Option<&FormField> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn to_multipart(&self) -> Result<Form> {
        let mut form = Form::new();
        for field in &self.fields {
            form = match field {
                FormField::Text {
                    name,
                    value,
                } => form.text(name.clone(), value.clone()),
                FormField::File {
                    name,
                    filename,
                    content_type,
                    data,
                } => {
                    let mut part = Part::bytes(data.clone()).file_name(filename.clone());
                    if let Some(content_type) = content_type {
                        part = part.mime_str(content_type).map_err(|err| CallflowError::Convert(format!("invalid content type '{}': {}", content_type, err)))?;
                    }
                    form.part(name.clone(), part)
                }
            };
        }
        Ok(form)
    }
}

/// Resolves parameters against earlier results and builds the payload.
///
/// Keys used as `{name}` placeholders in `url_path` never reach the payload.
/// A multipart form is produced when the `file` key meets the run's file, or
/// when any value is an inline binary; otherwise a JSON object.
pub fn process_params(
    raw_params: &HashMap<String, Value>,
    results: &impl ResultSource,
    url_path: &str,
    file_meta: Option<&FileMeta>,
    file_data: Option<&[u8]>,
) -> Result<Payload> {
    let url_keys = url::placeholders(url_path);

    let mut resolved = Map::new();
    for (key, value) in raw_params {
        if url_keys.contains(&key.as_str()) {
            continue;
        }
        resolved.insert(key.clone(), reference::resolve_value(value, results)?);
    }

    let attach_file = resolved.contains_key(FILE_KEY) && (file_meta.is_some() || file_data.is_some());
    if !attach_file && !resolved.values().any(contains_binary) {
        return Ok(Payload::Json(resolved));
    }

    let mut form = FormPayload::default();

    if attach_file {
        let field = resolved.remove(FILE_KEY);
        let name = match field {
            Some(Value::String(s)) if !s.is_empty() => s,
            _ => DEFAULT_FILE_FIELD.to_string(),
        };
        let data = file_data.ok_or_else(|| CallflowError::Config("parameter 'file' requires file data in the environment".to_string()))?;

        form.fields.push(FormField::File {
            name,
            filename: file_meta.map(|m| m.filename.clone()).filter(|f| !f.is_empty()).unwrap_or_else(|| DEFAULT_FILENAME.to_string()),
            content_type: file_meta.and_then(|m| m.content_type.clone()),
            data: data.to_vec(),
        });
    }

    for (key, value) in &resolved {
        flatten(key, value, &mut form.fields)?;
    }

    Ok(Payload::Form(form))
}

fn contains_binary(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.contains_key(BINARY_KEY) || map.values().any(contains_binary),
        Value::Array(items) => items.iter().any(contains_binary),
        _ => false,
    }
}

/// Arrays become `key[0]`, objects `key[sub]`; nulls are dropped.
fn flatten(
    key: &str,
    value: &Value,
    fields: &mut Vec<FormField>,
) -> Result<()> {
    match value {
        Value::Null => {}
        Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                flatten(&format!("{}[{}]", key, idx), item, fields)?;
            }
        }
        Value::Object(map) if map.contains_key(BINARY_KEY) => fields.push(binary_field(key, map)?),
        Value::Object(map) => {
            for (sub, item) in map {
                flatten(&format!("{}[{}]", key, sub), item, fields)?;
            }
        }
        scalar => fields.push(FormField::Text {
            name: key.to_string(),
            value: reference::value_to_string(scalar),
        }),
    }
    Ok(())
}

fn binary_field(
    key: &str,
    map: &Map<String, Value>,
) -> Result<FormField> {
    let encoded = map
        .get(BINARY_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| CallflowError::Convert(format!("binary parameter '{}' must carry a base64 string", key)))?;

    Ok(FormField::File {
        name: key.to_string(),
        filename: map.get("filename").and_then(Value::as_str).unwrap_or(DEFAULT_FILENAME).to_string(),
        content_type: map.get("contentType").and_then(Value::as_str).map(str::to_string),
        data: STANDARD.decode(encoded)?,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::NodeId;

    fn params(value: Value) -> HashMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    fn results() -> HashMap<NodeId, Value> {
        HashMap::from([("1".to_string(), json!({ "result": { "token": "t-1" }, "id": "abc" }))])
    }

    #[test]
    fn test_resolves_nested_reference() {
        let payload = process_params(&params(json!({ "token": "{{#1.result.token}}", "limit": 5 })), &results(), "/predict", None, None).unwrap();
        assert_eq!(payload, Payload::Json(params(json!({ "token": "t-1", "limit": 5 })).into_iter().collect()));
    }

    #[test]
    fn test_missing_result_is_config_error() {
        let err = process_params(&params(json!({ "token": "{{#1.result.token}}" })), &HashMap::new(), "/predict", None, None).unwrap_err();
        assert!(matches!(err, CallflowError::Config(_)));
    }

    #[test]
    fn test_url_keys_removed_from_body() {
        let payload = process_params(&params(json!({ "jobId": 42, "verbose": true })), &results(), "/jobs/{jobId}", None, None).unwrap();
        let body = payload.as_json().unwrap();
        assert!(!body.contains_key("jobId"));
        assert_eq!(body["verbose"], json!(true));
    }

    #[test]
    fn test_url_keys_are_not_resolved_into_body() {
        // the placeholder value references a missing node but it only feeds the url
        let payload = process_params(&params(json!({ "taskId": "{{#7.id}}" })), &results(), "/tasks/{taskId}", None, None).unwrap();
        assert!(payload.as_json().unwrap().is_empty());
    }

    #[test]
    fn test_file_key_without_file_stays_json() {
        let payload = process_params(&params(json!({ "file": "image" })), &results(), "/predict", None, None).unwrap();
        assert_eq!(payload.as_json().unwrap()["file"], json!("image"));
    }

    #[test]
    fn test_file_builds_multipart() {
        let meta = FileMeta {
            filename: "leaf.jpg".to_string(),
            content_type: Some("image/jpeg".to_string()),
            size: Some(3),
        };
        let payload = process_params(
            &params(json!({ "file": "image", "crop": "rice", "tags": ["a", "b"], "opts": { "topK": 3, "skip": null } })),
            &results(),
            "/predict",
            Some(&meta),
            Some(&[1, 2, 3]),
        )
        .unwrap();

        let Payload::Form(form) = payload else {
            panic!("expected a form payload");
        };
        assert_eq!(
            form.field("image"),
            Some(&FormField::File {
                name: "image".to_string(),
                filename: "leaf.jpg".to_string(),
                content_type: Some("image/jpeg".to_string()),
                data: vec![1, 2, 3],
            })
        );
        assert!(form.field("file").is_none());
        assert_eq!(
            form.field("tags[1]"),
            Some(&FormField::Text {
                name: "tags[1]".to_string(),
                value: "b".to_string(),
            })
        );
        assert_eq!(
            form.field("opts[topK]"),
            Some(&FormField::Text {
                name: "opts[topK]".to_string(),
                value: "3".to_string(),
            })
        );
        assert!(form.field("opts[skip]").is_none());
        assert!(form.to_multipart().is_ok());
    }

    #[test]
    fn test_file_meta_without_data_is_config_error() {
        let meta = FileMeta {
            filename: "leaf.jpg".to_string(),
            ..Default::default()
        };
        let err = process_params(&params(json!({ "file": true })), &results(), "/predict", Some(&meta), None).unwrap_err();
        assert!(matches!(err, CallflowError::Config(_)));
    }

    #[test]
    fn test_inline_binary_builds_multipart() {
        let payload = process_params(
            &params(json!({ "mask": { "$binary": "AQID", "filename": "mask.png", "contentType": "image/png" }, "id": "{{#1.id}}" })),
            &results(),
            "/segment",
            None,
            None,
        )
        .unwrap();

        let Payload::Form(form) = payload else {
            panic!("expected a form payload");
        };
        assert_eq!(
            form.field("mask"),
            Some(&FormField::File {
                name: "mask".to_string(),
                filename: "mask.png".to_string(),
                content_type: Some("image/png".to_string()),
                data: vec![1, 2, 3],
            })
        );
        assert_eq!(
            form.field("id"),
            Some(&FormField::Text {
                name: "id".to_string(),
                value: "abc".to_string(),
            })
        );
    }

    #[test]
    fn test_invalid_base64_is_convert_error() {
        let err = process_params(&params(json!({ "mask": { "$binary": "***" } })), &results(), "/segment", None, None).unwrap_err();
        assert!(matches!(err, CallflowError::Convert(_)));
    }
}
