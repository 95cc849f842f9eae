//! LLM layer: chat client, doctype selection, query refinement.

mod client;
mod refiner;
mod selector;

pub use client::{strip_markdown, ChatModel, OpenAiChat};
pub use refiner::refine_with_history;
pub use selector::DoctypeSelector;
