//! Streaming chat client for OpenAI-compatible inference servers.
//!
//! ```ignore
//! use efx_chat::{ChatClient, ChatMessage, StreamEvent};
//!
//! let client = ChatClient::new(8000);
//! let mut stream = client.stream_chat_completion(&[ChatMessage::user("hello")]);
//! while let Some(event) = stream.recv().await {
//!     match event {
//!         StreamEvent::Delta(text) => print!("{}", text),
//!         StreamEvent::Failed(err) => eprintln!("{}", err),
//!         StreamEvent::Finished => println!(),
//!     }
//! }
//! ```

mod client;
mod error;
mod sse;
mod stream;
mod types;

pub use client::{ChatClient, DEFAULT_TIMEOUT, DEFAULT_TITLE};
pub use error::ChatError;
pub use stream::{ChatStream, StreamCancel, StreamEvent};
pub use types::{
    ChatMessage, ChatResponse, Choice, Delta, ResponseMessage, StreamChoice, StreamChunk, Usage,
};
