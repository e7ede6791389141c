//! Messages exchanged between the background coordinator and pages
//!
//! Wire form is `{ "type": "contextDock.<kind>", "payload": { ... } }`.
//! Replies use the `{ ok, result | error }` envelope.
//!
//! ## Unknown messages
//!
//! The extension runtime delivers every message to every listener, so a
//! `type` this side does not know is ignored (no reply at all). A known
//! `type` whose payload does not decode is answered with an error.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{DockError, Result};
use crate::storage::Prompt;

/// Browser tab id
pub type TabId = i64;

/// A closed set of message kinds sharing the tagged wire form
pub trait Message: Serialize + DeserializeOwned {
    /// Every `type` string this set understands
    const KINDS: &'static [&'static str];

    fn kind(&self) -> &'static str;
}

/// Background -> page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ContentCommand {
    #[serde(rename = "contextDock.openPicker", rename_all = "camelCase")]
    OpenPicker {
        prompts:      Vec<Prompt>,
        #[serde(default)]
        last_used_id: Option<String>,
    },

    #[serde(rename = "contextDock.injectPrompt")]
    InjectPrompt {
        #[serde(default)]
        prompt:  Option<Prompt>,
        #[serde(default)]
        prompts: Vec<Prompt>,
    },

    #[serde(rename = "contextDock.openSaveModal", rename_all = "camelCase")]
    OpenSaveModal {
        selection_text:  String,
        #[serde(default)]
        source_url:      String,
        #[serde(default)]
        suggested_title: String,
    },
}

impl Message for ContentCommand {
    const KINDS: &'static [&'static str] = &[
        "contextDock.openPicker",
        "contextDock.injectPrompt",
        "contextDock.openSaveModal",
    ];

    fn kind(&self) -> &'static str {
        match self {
            ContentCommand::OpenPicker { .. } => "contextDock.openPicker",
            ContentCommand::InjectPrompt { .. } => "contextDock.injectPrompt",
            ContentCommand::OpenSaveModal { .. } => "contextDock.openSaveModal",
        }
    }
}

/// Page or popup -> background
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BackgroundRequest {
    #[serde(rename = "contextDock.promptSelected", rename_all = "camelCase")]
    PromptSelected { prompt_id: String },

    #[serde(rename = "contextDock.getPrompts")]
    GetPrompts,

    /// Raw record; validated by the store, not by the decoder
    #[serde(rename = "contextDock.savePrompt")]
    SavePrompt(Value),

    #[serde(rename = "contextDock.updatePrompt")]
    UpdatePrompt { id: String, changes: Value },

    #[serde(rename = "contextDock.deletePrompt")]
    DeletePrompt { id: String },

    #[serde(rename = "contextDock.recordUsage", rename_all = "camelCase")]
    RecordUsage { prompt_id: String },

    #[serde(rename = "contextDock.getStats")]
    GetStats,

    #[serde(rename = "contextDock.exportPrompts")]
    ExportPrompts,

    #[serde(rename = "contextDock.importPrompts")]
    ImportPrompts { payload: Value },
}

impl Message for BackgroundRequest {
    const KINDS: &'static [&'static str] = &[
        "contextDock.promptSelected",
        "contextDock.getPrompts",
        "contextDock.savePrompt",
        "contextDock.updatePrompt",
        "contextDock.deletePrompt",
        "contextDock.recordUsage",
        "contextDock.getStats",
        "contextDock.exportPrompts",
        "contextDock.importPrompts",
    ];

    fn kind(&self) -> &'static str {
        match self {
            BackgroundRequest::PromptSelected { .. } => "contextDock.promptSelected",
            BackgroundRequest::GetPrompts => "contextDock.getPrompts",
            BackgroundRequest::SavePrompt(_) => "contextDock.savePrompt",
            BackgroundRequest::UpdatePrompt { .. } => "contextDock.updatePrompt",
            BackgroundRequest::DeletePrompt { .. } => "contextDock.deletePrompt",
            BackgroundRequest::RecordUsage { .. } => "contextDock.recordUsage",
            BackgroundRequest::GetStats => "contextDock.getStats",
            BackgroundRequest::ExportPrompts => "contextDock.exportPrompts",
            BackgroundRequest::ImportPrompts { .. } => "contextDock.importPrompts",
        }
    }
}

/// Decode a raw message. `Ok(None)` means "not ours, stay silent".
pub fn decode<M: Message>(raw: &Value) -> Result<Option<M>> {
    let Some(kind) = raw.get("type").and_then(Value::as_str) else {
        return Ok(None);
    };
    if !M::KINDS.contains(&kind) {
        return Ok(None);
    }

    serde_json::from_value(raw.clone())
        .map(Some)
        .map_err(|e| DockError::InvalidMessage {
            kind:   kind.to_string(),
            reason: e.to_string(),
        })
}

/// Reply envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub ok:     bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error:  Option<String>,
}

impl Reply {
    /// `{ ok: true }`
    pub fn ack() -> Self {
        Reply {
            ok:     true,
            result: None,
            error:  None,
        }
    }

    pub fn success(result: Value) -> Self {
        Reply {
            ok:     true,
            result: Some(result),
            error:  None,
        }
    }

    pub fn failure(err: &DockError) -> Self {
        Reply {
            ok:     false,
            result: None,
            error:  Some(err.user_message()),
        }
    }

    pub fn from_result(result: Result<Value>) -> Self {
        match result {
            Ok(Value::Null) => Reply::ack(),
            Ok(value) => Reply::success(value),
            Err(err) => Reply::failure(&err),
        }
    }

    /// Unwrap the envelope on the requesting side
    pub fn into_result(self) -> Result<Value> {
        if self.ok {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(DockError::Other(
                self.error.unwrap_or_else(|| "Request failed".to_string()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    // ========================================
    // Wire format
    // ========================================

    #[test]
    fn test_inject_command_wire_format() {
        let raw = json!({
            "type": "contextDock.injectPrompt",
            "payload": {
                "prompt": { "id": "a", "title": "A", "content": "Hi" },
                "prompts": []
            }
        });

        let command: ContentCommand = decode(&raw).unwrap().unwrap();
        match &command {
            ContentCommand::InjectPrompt { prompt, prompts } => {
                assert_eq!(prompt.as_ref().unwrap().id, "a");
                assert!(prompts.is_empty());
            },
            other => panic!("Expected InjectPrompt, got {:?}", other),
        }
        assert_eq!(serde_json::to_value(&command).unwrap(), raw);
    }

    #[test]
    fn test_open_picker_uses_camel_case() {
        let command = ContentCommand::OpenPicker {
            prompts:      vec![],
            last_used_id: Some("x".into()),
        };
        let value = serde_json::to_value(&command).unwrap();
        assert_eq!(value["type"], "contextDock.openPicker");
        assert_eq!(value["payload"]["lastUsedId"], "x");
    }

    #[test]
    fn test_save_modal_payload() {
        let raw = json!({
            "type": "contextDock.openSaveModal",
            "payload": {
                "selectionText": "some text",
                "sourceUrl": "https://claude.ai/",
                "suggestedTitle": "some text"
            }
        });
        let command: ContentCommand = decode(&raw).unwrap().unwrap();
        assert_eq!(command.kind(), "contextDock.openSaveModal");
    }

    #[test]
    fn test_unit_request_without_payload() {
        let raw = json!({ "type": "contextDock.getPrompts" });
        let request: BackgroundRequest = decode(&raw).unwrap().unwrap();
        assert_eq!(request, BackgroundRequest::GetPrompts);
    }

    #[test]
    fn test_prompt_selected_payload() {
        let raw = json!({ "type": "contextDock.promptSelected", "payload": { "promptId": "2" } });
        let request: BackgroundRequest = decode(&raw).unwrap().unwrap();
        assert_eq!(
            request,
            BackgroundRequest::PromptSelected {
                prompt_id: "2".into(),
            }
        );
    }

    #[test]
    fn test_kinds_cover_every_variant() {
        let requests = vec![
            BackgroundRequest::PromptSelected { prompt_id: "a".into() },
            BackgroundRequest::GetPrompts,
            BackgroundRequest::SavePrompt(json!({})),
            BackgroundRequest::UpdatePrompt {
                id:      "a".into(),
                changes: json!({}),
            },
            BackgroundRequest::DeletePrompt { id: "a".into() },
            BackgroundRequest::RecordUsage { prompt_id: "a".into() },
            BackgroundRequest::GetStats,
            BackgroundRequest::ExportPrompts,
            BackgroundRequest::ImportPrompts { payload: json!([]) },
        ];
        for request in requests {
            assert!(BackgroundRequest::KINDS.contains(&request.kind()));
            let value = serde_json::to_value(&request).unwrap();
            assert_eq!(value["type"], request.kind());
        }
    }

    // ========================================
    // Unknown / malformed
    // ========================================

    #[test]
    fn test_unknown_type_is_ignored() {
        let raw = json!({ "type": "someOtherExtension.ping", "payload": {} });
        assert!(decode::<ContentCommand>(&raw).unwrap().is_none());
        assert!(decode::<BackgroundRequest>(&raw).unwrap().is_none());
    }

    #[test]
    fn test_missing_type_is_ignored() {
        assert!(decode::<ContentCommand>(&json!({ "payload": {} })).unwrap().is_none());
        assert!(decode::<ContentCommand>(&json!(null)).unwrap().is_none());
        assert!(decode::<ContentCommand>(&json!({ "type": 7 })).unwrap().is_none());
    }

    #[test]
    fn test_known_type_with_bad_payload_is_error() {
        let raw = json!({ "type": "contextDock.deletePrompt", "payload": { "id": 5 } });
        match decode::<BackgroundRequest>(&raw) {
            Err(DockError::InvalidMessage { kind, .. }) => {
                assert_eq!(kind, "contextDock.deletePrompt");
            },
            other => panic!("Expected InvalidMessage, got {:?}", other),
        }
    }

    #[test]
    fn test_request_kind_is_not_a_command() {
        let raw = json!({ "type": "contextDock.getPrompts" });
        assert!(decode::<ContentCommand>(&raw).unwrap().is_none());
    }

    // ========================================
    // Reply envelope
    // ========================================

    #[test]
    fn test_reply_ack_serializes_bare() {
        assert_eq!(serde_json::to_value(Reply::ack()).unwrap(), json!({ "ok": true }));
    }

    #[test]
    fn test_reply_failure_carries_user_message() {
        let reply = Reply::failure(&DockError::validation("Prompt title must be a non-empty string."));
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({ "ok": false, "error": "Prompt title must be a non-empty string." })
        );
        assert!(reply.into_result().is_err());
    }

    #[test]
    fn test_reply_from_result() {
        assert_eq!(Reply::from_result(Ok(Value::Null)), Reply::ack());
        assert_eq!(
            Reply::from_result(Ok(json!(true))).into_result().unwrap(),
            json!(true)
        );
    }
}
