// Generation module
// Interface to the text-generation backend and its streamed response format

#[cfg(test)]
mod tests;

pub mod stream;

use serde::{Deserialize, Serialize};

use crate::{RagError, Result};

pub use stream::{FragmentStream, GenerationStream};

/// Sampling configuration forwarded to the backend
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl GenerationOptions {
    #[inline]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[inline]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Produces text for a prompt, as a stream of fragments
pub trait GenerationBackend: Send + Sync {
    /// Stable identifier of the underlying model
    fn model_id(&self) -> &str;

    /// Start generating; fragments are read lazily from the returned stream
    fn generate_stream(&self, prompt: &str, options: &GenerationOptions)
    -> Result<GenerationStream>;

    /// Generate and wait for the complete text
    #[inline]
    fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        collect_fragments(self.generate_stream(prompt, options)?, |_| {})
    }
}

/// Drain a fragment stream into one string, reporting each fragment as it arrives
///
/// On failure the text gathered so far is attached to the returned
/// `GenerationBackend` error rather than dropped.
#[inline]
pub fn collect_fragments<I, F>(fragments: I, mut on_fragment: F) -> Result<String>
where
    I: IntoIterator<Item = Result<String>>,
    F: FnMut(&str),
{
    let mut answer = String::new();

    for fragment in fragments {
        match fragment {
            Ok(text) => {
                on_fragment(&text);
                answer.push_str(&text);
            }
            Err(error) => {
                let message = match error {
                    RagError::GenerationBackend { message, .. } => message,
                    other => other.to_string(),
                };
                let partial = (!answer.is_empty()).then_some(answer);
                return Err(RagError::GenerationBackend { message, partial });
            }
        }
    }

    Ok(answer)
}
