pub mod buffer;
pub mod compression;
pub mod constants;
pub mod data_handle;
pub mod error;
pub mod export;
pub mod format;
pub mod latency;
pub mod quality;
pub mod sequence;
pub mod session;
pub mod session_loop;
