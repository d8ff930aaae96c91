//! Vendor-tagged tool-call envelopes.
//!
//! The two supported model providers disagree about the shape of a tool
//! invocation: OpenAI nests the call under a `function` object with the
//! arguments as a JSON *string*, while Gemini carries a flat `functionCall`
//! with the arguments as a JSON *object*. Unifying the two into one schema
//! would force lossy round-tripping of provider-specific fields, so the
//! normalizer does not try: it records the vendor discriminator next to the
//! untouched native payload and leaves interpretation to the consumer.

use async_openai::types::{ChatCompletionMessageToolCall, ChatCompletionRequestToolMessage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The model provider whose native schema a payload is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vendor {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "gemini")]
    Gemini,
}

/// A tool call in OpenAI's native chat-completions shape.
pub type OpenAiToolCall = ChatCompletionMessageToolCall;

/// A tool result in OpenAI's native shape: the tool-role message that is fed
/// back into the conversation.
pub type OpenAiToolResult = ChatCompletionRequestToolMessage;

/// A tool call in Gemini's native `functionCall` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiFunctionCall {
    /// Present when the model supplies a call identifier; older API versions
    /// correlate by name only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    /// Already-parsed argument object (Gemini sends structured JSON, not a
    /// string like OpenAI).
    pub args: Value,
}

/// A tool result in Gemini's native `functionResponse` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiFunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: Value,
}

/// A tool call tagged with its originating vendor, payload untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "vendor", content = "payload")]
pub enum VendorToolCall {
    #[serde(rename = "openai")]
    OpenAi(OpenAiToolCall),
    #[serde(rename = "gemini")]
    Gemini(GeminiFunctionCall),
}

/// A tool result tagged with its originating vendor, payload untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "vendor", content = "payload")]
pub enum VendorToolResult {
    #[serde(rename = "openai")]
    OpenAi(OpenAiToolResult),
    #[serde(rename = "gemini")]
    Gemini(GeminiFunctionResponse),
}

impl VendorToolCall {
    pub fn vendor(&self) -> Vendor {
        match self {
            VendorToolCall::OpenAi(_) => Vendor::OpenAi,
            VendorToolCall::Gemini(_) => Vendor::Gemini,
        }
    }

    /// The provider-assigned call identifier, when one exists.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            VendorToolCall::OpenAi(call) => Some(&call.id),
            VendorToolCall::Gemini(call) => call.id.as_deref(),
        }
    }

    /// The invoked tool's name, wherever the vendor buries it.
    pub fn tool_name(&self) -> &str {
        match self {
            VendorToolCall::OpenAi(call) => &call.function.name,
            VendorToolCall::Gemini(call) => &call.name,
        }
    }
}

impl VendorToolResult {
    pub fn vendor(&self) -> Vendor {
        match self {
            VendorToolResult::OpenAi(_) => Vendor::OpenAi,
            VendorToolResult::Gemini(_) => Vendor::Gemini,
        }
    }
}
