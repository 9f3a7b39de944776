mod error;
mod sse;
mod stream;
mod types;

#[cfg(feature = "deepseek")]
pub mod deepseek;
#[cfg(feature = "gemini")]
pub mod gemini;
#[cfg(test)]
pub mod stub;

pub use error::StreamError;
pub use stream::ReadOptions;
pub use types::{ChatRequest, Channel, Delta, DeltaStream, HistoryEntry, Provider, Speaker};
