pub mod args;
pub mod audio;
pub mod error;
pub mod event;
pub mod handler;
pub mod info;
pub mod protocol;
pub mod sentence;
pub mod server;
pub mod session;
pub mod tts;
