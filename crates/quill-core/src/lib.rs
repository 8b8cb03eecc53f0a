pub mod config;
pub mod context;
pub mod entry;
pub mod error;
pub mod hash;
pub mod types;

pub use config::QuillConfig;
pub use context::{Identity, RequestContext, ValidatedContext};
pub use error::{CoreError, CoreResult};
pub use types::*;
