//! Session establishment, directional AEAD transport, and key rotation
//! (spec.md §4.2, §4.3).

pub mod exchange;
pub mod manager;
pub mod state;

pub use manager::SessionManager;
pub use state::{Session, SessionKeys, SessionState};
