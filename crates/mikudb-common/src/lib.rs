pub mod error;
pub mod types;
pub mod config;

pub use config::{CodecConfig, DecodeConfig, EncodeConfig, Utf8ValidationConfig};
pub use error::{MikuError, MikuResult};
pub use types::*;
