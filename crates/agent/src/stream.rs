//! Folds streamed chunks into a single provider response.

use stepwise_core::{Message, MessageToolCall, ProviderResponse, StreamChunk, Usage};

/// Accumulates text deltas and tool-call fragments for one model call.
///
/// Fragments carrying an id already seen extend that call's arguments; an
/// empty id continues the most recent call; anything else starts a new call.
#[derive(Debug, Default)]
pub(crate) struct StreamAccumulator {
    text: String,
    tool_calls: Vec<MessageToolCall>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

impl StreamAccumulator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Absorb one chunk. Returns the text delta to report, if any.
    pub(crate) fn push(&mut self, chunk: &StreamChunk) -> Option<String> {
        for fragment in &chunk.tool_calls {
            self.merge_tool_call(fragment);
        }
        if chunk.finish_reason.is_some() {
            self.finish_reason.clone_from(&chunk.finish_reason);
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }

        let delta = chunk.content.as_deref().filter(|d| !d.is_empty())?;
        self.text.push_str(delta);
        Some(delta.to_string())
    }

    fn merge_tool_call(&mut self, fragment: &MessageToolCall) {
        let existing = if fragment.id.is_empty() {
            self.tool_calls.last_mut()
        } else {
            self.tool_calls.iter_mut().find(|c| c.id == fragment.id)
        };

        match existing {
            Some(call) => {
                if call.name.is_empty() {
                    call.name.clone_from(&fragment.name);
                }
                call.arguments.push_str(&fragment.arguments);
            }
            None => self.tool_calls.push(fragment.clone()),
        }
    }

    pub(crate) fn finish(self) -> ProviderResponse {
        let finish_reason = self.finish_reason.or_else(|| {
            Some(if self.tool_calls.is_empty() { "stop" } else { "tool_calls" }.to_string())
        });
        ProviderResponse {
            message: Message::assistant_with_tool_calls(self.text, self.tool_calls),
            usage: self.usage,
            finish_reason,
            model: String::new(),
        }
    }
}
