//! Prompt template system
//!
//! Templates are `.pmt` files addressed by stable names, rendered with
//! handlebars. Loading chain: user override directory, repo directory,
//! embedded fallback.

pub mod embedded;
mod loader;

pub use loader::{PromptError, PromptLoader, TEMPLATE_NAMES};
