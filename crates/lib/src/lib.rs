//! Relay core library: per-conversation dispatch, resilient backend delivery, typing presence
//! and bounded audio transcription, plus the HTTP gateway the CLI serves.

pub mod channels;
pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod gateway;
pub mod init;
pub mod processor;
pub mod transcribe;
pub mod typing;

#[cfg(test)]
mod test_support;
