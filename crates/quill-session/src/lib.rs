pub mod audit;
pub mod binding;
pub mod cache;
pub mod core;
pub mod gate;
pub mod manager;
pub mod outcome;

pub use crate::core::SessionCore;
pub use audit::AuditLog;
pub use binding::BindingProtocol;
pub use gate::{Admitted, ModeGate, Operation};
pub use manager::{ResolveOrigin, Resolved, SessionManager};
pub use outcome::{StoreOutcome, TieredStore};
