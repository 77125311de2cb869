pub mod channel;
pub mod choice;
pub mod config;
pub mod editor;
pub mod error;
pub mod extractor;
pub mod fieldset;
pub mod forwarder;
pub mod locale;
pub mod logger;
pub mod session;
