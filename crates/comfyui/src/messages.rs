//! Wire format of the ComfyUI event stream.
//!
//! Every frame is a JSON object `{"type": "<kind>", "data": {...}}`.
//! [`parse_message`] turns the kinds the relay reacts to into
//! [`ComfyUIMessage`]; anything else is a parse error the caller logs and
//! skips.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ComfyUIMessage {
    /// Periodic queue broadcast.
    Status(StatusData),
    ExecutionStart(PromptRef),
    ExecutionCached(CachedNodes),
    /// `node: null` marks the end of a prompt on older servers.
    Executing(NodeRef),
    Progress(StepProgress),
    /// A node produced output, possibly saved images.
    Executed(NodeOutput),
    ExecutionSuccess(PromptRef),
    ExecutionError(NodeFailure),
    ExecutionInterrupted(Interruption),
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    status: QueueSnapshot,
}

#[derive(Debug, Clone, Deserialize)]
struct QueueSnapshot {
    exec_info: ExecInfo,
}

#[derive(Debug, Clone, Deserialize)]
struct ExecInfo {
    queue_remaining: i64,
}

impl StatusData {
    /// Prompts waiting or running on the backend, clamped at zero.
    pub fn queue_remaining(&self) -> u32 {
        self.status
            .exec_info
            .queue_remaining
            .clamp(0, i64::from(u32::MAX)) as u32
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptRef {
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CachedNodes {
    pub prompt_id: String,
    #[serde(default)]
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeRef {
    pub prompt_id: String,
    pub node: Option<String>,
}

/// Sampler step counter. Older servers omit `prompt_id`.
#[derive(Debug, Clone, Deserialize)]
pub struct StepProgress {
    pub value: u32,
    pub max: u32,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeOutput {
    pub prompt_id: String,
    pub node: String,
    output: serde_json::Value,
}

impl NodeOutput {
    /// Well-formed entries of `output.images`, in server order.
    pub fn images(&self) -> Vec<SavedImage> {
        let Some(entries) = self.output.get("images").and_then(|v| v.as_array()) else {
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(|entry| SavedImage::deserialize(entry).ok())
            .collect()
    }
}

/// Location of an image on the backend, as `/view` expects it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SavedImage {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// `output` for saved files, `temp` for previews.
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeFailure {
    pub prompt_id: String,
    pub node_id: String,
    pub exception_type: String,
    pub exception_message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Interruption {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
}

pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn status_depth_is_clamped() {
        let frame = |n: i64| {
            format!(r#"{{"type":"status","data":{{"status":{{"exec_info":{{"queue_remaining":{n}}}}},"sid":"s1"}}}}"#)
        };
        assert_matches!(parse_message(&frame(3)), Ok(ComfyUIMessage::Status(s)) if s.queue_remaining() == 3);
        assert_matches!(parse_message(&frame(-2)), Ok(ComfyUIMessage::Status(s)) if s.queue_remaining() == 0);
    }

    #[test]
    fn executing_null_node_is_preserved() {
        let msg = parse_message(r#"{"type":"executing","data":{"node":null,"prompt_id":"p1"}}"#);
        assert_matches!(msg, Ok(ComfyUIMessage::Executing(NodeRef { node: None, ref prompt_id })) if prompt_id == "p1");
    }

    #[test]
    fn executed_lists_only_well_formed_images() {
        let msg = parse_message(
            r#"{"type":"executed","data":{"node":"9","prompt_id":"p1","output":{"images":[
                {"filename":"a.png","subfolder":"","type":"output"},
                {"subfolder":"x"},
                {"filename":"b.png","type":"temp"}
            ]}}}"#,
        )
        .unwrap();
        let ComfyUIMessage::Executed(out) = msg else {
            panic!("expected executed, got {msg:?}");
        };
        let names: Vec<_> = out.images().into_iter().map(|i| (i.filename, i.kind)).collect();
        assert_eq!(
            names,
            vec![("a.png".to_string(), "output".to_string()), ("b.png".to_string(), "temp".to_string())]
        );
    }

    #[test]
    fn executed_text_output_has_no_images() {
        let msg = parse_message(
            r#"{"type":"executed","data":{"node":"12","prompt_id":"p1","output":{"text":["hi"]}}}"#,
        )
        .unwrap();
        assert_matches!(msg, ComfyUIMessage::Executed(out) if out.images().is_empty());
    }

    #[test]
    fn terminal_kinds_parse() {
        assert_matches!(
            parse_message(r#"{"type":"execution_success","data":{"prompt_id":"p1","timestamp":1}}"#),
            Ok(ComfyUIMessage::ExecutionSuccess(PromptRef { .. }))
        );
        assert_matches!(
            parse_message(r#"{"type":"execution_error","data":{"prompt_id":"p1","node_id":"5","exception_type":"RuntimeError","exception_message":"oom","traceback":[]}}"#),
            Ok(ComfyUIMessage::ExecutionError(NodeFailure { ref node_id, .. })) if node_id == "5"
        );
        assert_matches!(
            parse_message(r#"{"type":"execution_interrupted","data":{"prompt_id":"p1","node_type":"KSampler","executed":[]}}"#),
            Ok(ComfyUIMessage::ExecutionInterrupted(Interruption { node_id: None, .. }))
        );
    }

    #[test]
    fn informational_kinds_parse() {
        assert_matches!(
            parse_message(r#"{"type":"progress","data":{"value":5,"max":20}}"#),
            Ok(ComfyUIMessage::Progress(StepProgress { value: 5, max: 20, prompt_id: None }))
        );
        assert_matches!(
            parse_message(r#"{"type":"execution_cached","data":{"prompt_id":"p1"}}"#),
            Ok(ComfyUIMessage::ExecutionCached(c)) if c.nodes.is_empty()
        );
        assert_matches!(
            parse_message(r#"{"type":"execution_start","data":{"prompt_id":"p1"}}"#),
            Ok(ComfyUIMessage::ExecutionStart(_))
        );
    }

    #[test]
    fn unknown_or_malformed_frames_are_errors() {
        assert!(parse_message(r#"{"type":"crystools.monitor","data":{}}"#).is_err());
        assert!(parse_message("not json").is_err());
    }
}
