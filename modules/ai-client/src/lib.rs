mod client;
mod schema;
mod types;

pub use client::OpenAi;
pub use schema::StructuredOutput;
pub use types::{ChatRequest, ChatResponse, WireMessage};
