use crate::gemini::generate_content::response::GenerateContentResponse;

/// Gemini's streaming endpoint emits a JSON array of these chunks over SSE;
/// each chunk has the same shape as a non-streaming response.
pub type StreamGenerateContentResponse = GenerateContentResponse;
