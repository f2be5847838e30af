//! Session re-exports.
//!
//! `dualmodel::Session` is the unit-of-work session: identity map, ordered
//! flush and relationship hydration over an in-memory [`Engine`].
//!
//! The implementation lives in the separate `dualmodel-session` crate. This
//! module exists so the facade can expose the session without forcing users
//! to depend on sub-crates directly.

pub use dualmodel_session::{
    Change, Engine, ObjectKey, ObjectState, Row, Session, SessionConfig, SessionDebugInfo,
};
