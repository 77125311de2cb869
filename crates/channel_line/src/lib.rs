// channel_line/src/lib.rs
pub mod client;
pub mod flex;
pub mod message;
pub mod webhook;

pub use client::{LineClient, LineError};
pub use message::Message;
pub use webhook::{EventMessage, MessageEvent, PostbackEvent, Source, WebhookBody, WebhookEvent};
