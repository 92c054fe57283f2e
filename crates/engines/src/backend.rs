//! The chat backend seam — one model turn, streamed.

use ua_domain::{BoxStream, Message, Result, StreamEvent, ToolSpec};

/// One streamed model turn.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// A backend translates [`BackendRequest`] into its wire protocol and
/// yields [`StreamEvent`]s. The engine loop owns everything else: tool
/// dispatch, pause/stop/cancel, step accounting.
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    /// Stable identifier, used as the provider id in routing.
    fn id(&self) -> &str;

    /// Whether the backend's configuration carries its minimum
    /// credentials. Routing treats unconfigured backends as unavailable.
    fn is_configured(&self) -> bool {
        true
    }

    async fn chat_stream(
        &self,
        req: &BackendRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;
}
