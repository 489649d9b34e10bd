//! Context injection: folding retrieved documents into a request.
//!
//! Retrieved documents are framed as the single point of truth for the
//! answer. The framing text tells the model that:
//!
//! 1. the documents are authoritative,
//! 2. they win over trained knowledge when the two disagree,
//! 3. it must say so when they do not cover the question.
//!
//! With no documents every `build*` function returns its input unchanged.
//!
//! # Shapes
//!
//! | Input | Where the context goes |
//! |-------|------------------------|
//! | prompt | prefixed to the prompt; system text gets a reinforcement clause |
//! | messages | appended to the first system message, or inserted as a new leading one |

use crate::models::{ChatMessage, Document, GenerationRequest, Payload};

/// Default framing placed before the documents.
pub const DEFAULT_PREAMBLE: &str = "The following documents are the single point of truth \
for this answer. Treat them as authoritative. If they contradict what you learned during \
training, follow the documents. If they do not contain enough information to answer, say \
explicitly that the documents are insufficient instead of guessing.";

/// Separator placed between two documents.
pub const DEFAULT_DELIMITER: &str = "\n\n---\n\n";

/// Appended to the system text of prompt-style requests.
pub const DEFAULT_REINFORCEMENT: &str =
    "Base your answer on the provided documents and state when they are insufficient.";

/// Builds augmented prompts and message lists from retrieved documents.
#[derive(Debug, Clone)]
pub struct ContextInjector {
    preamble: String,
    delimiter: String,
    reinforcement: String,
}

impl Default for ContextInjector {
    fn default() -> Self {
        Self {
            preamble: DEFAULT_PREAMBLE.to_string(),
            delimiter: DEFAULT_DELIMITER.to_string(),
            reinforcement: DEFAULT_REINFORCEMENT.to_string(),
        }
    }
}

impl ContextInjector {
    /// The preamble followed by the document bodies in store order.
    ///
    /// Returns `None` for an empty document list.
    pub fn context_block(&self, docs: &[Document]) -> Option<String> {
        if docs.is_empty() {
            return None;
        }
        let bodies: Vec<&str> = docs.iter().map(|d| d.content.as_str()).collect();
        Some(format!(
            "{}\n\nDocuments:\n\n{}",
            self.preamble,
            bodies.join(&self.delimiter)
        ))
    }

    /// Augment a whole request. Only `payload` and, for prompts, `system`
    /// are touched.
    pub fn build(&self, req: GenerationRequest, docs: &[Document]) -> GenerationRequest {
        if docs.is_empty() {
            return req;
        }
        let GenerationRequest {
            payload,
            model,
            system,
            options,
            stream,
            temperature,
        } = req;
        let (payload, system) = match payload {
            Payload::Prompt(prompt) => {
                let (prompt, system) = self.build_prompt(&prompt, system.as_deref(), docs);
                (Payload::Prompt(prompt), system)
            }
            Payload::Messages(messages) => {
                (Payload::Messages(self.build_messages(messages, docs)), system)
            }
        };
        GenerationRequest {
            payload,
            model,
            system,
            options,
            stream,
            temperature,
        }
    }

    /// Prompt-style augmentation. Returns the new prompt and system text.
    pub fn build_prompt(
        &self,
        prompt: &str,
        system: Option<&str>,
        docs: &[Document],
    ) -> (String, Option<String>) {
        let context = match self.context_block(docs) {
            Some(c) => c,
            None => return (prompt.to_string(), system.map(str::to_string)),
        };
        let prompt = format!("{}\n\n{}", context, prompt);
        let system = match system {
            Some(s) if !s.trim().is_empty() => format!("{}\n\n{}", s, self.reinforcement),
            _ => self.reinforcement.clone(),
        };
        (prompt, Some(system))
    }

    /// Message-list augmentation.
    ///
    /// The original system instructions are kept and the context is appended
    /// after them, so operator prompts still lead.
    pub fn build_messages(
        &self,
        mut messages: Vec<ChatMessage>,
        docs: &[Document],
    ) -> Vec<ChatMessage> {
        let context = match self.context_block(docs) {
            Some(c) => c,
            None => return messages,
        };
        match messages.iter_mut().find(|m| m.is_system()) {
            Some(system) => {
                system.content = if system.content.trim().is_empty() {
                    context
                } else {
                    format!("{}\n\n{}", system.content, context)
                };
            }
            None => messages.insert(0, ChatMessage::new("system", context)),
        }
        messages
    }
}
