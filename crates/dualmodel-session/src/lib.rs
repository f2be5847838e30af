//! Engine and unit-of-work session for dualmodel.
//!
//! `dualmodel-session` persists instances of table models.
//!
//! # Role In The Architecture
//!
//! - **Engine**: [`Engine`] is an in-memory, SQLite-flavoured store built from
//!   a configured registry. It enforces NOT NULL, primary key, UNIQUE and
//!   FOREIGN KEY constraints and applies `ON DELETE` actions.
//! - **Session**: [`Session`] tracks objects, keeps an identity map and
//!   writes changes on flush, ordering parents before children.
//! - **Codec**: column values are quantized and JSON-encoded on the way in
//!   and decoded on the way out.
//!
//! # Example
//!
//! ```ignore
//! let engine = Engine::memory();
//! engine.create_all(&registry)?;
//!
//! let mut session = Session::new(&engine, &registry);
//! session.add(&hero)?;
//! session.commit()?;
//!
//! // Same handle through the identity map
//! let again = session.get("Hero", 1)?;
//! ```

pub mod codec;
pub mod engine;
pub mod session;

pub use engine::{Change, Engine, Row};
pub use session::{ObjectKey, ObjectState, Session, SessionConfig, SessionDebugInfo};
