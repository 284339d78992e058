//! # Core Types
//!
//! The value types every other module speaks in. Nothing here spawns a task
//! or holds a lock.
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │         CORE            │
//!                    │  (this module)          │
//!                    │                         │
//!                    │  • Action pairings      │
//!                    │  • Reducer (S -> S)     │
//!                    │  • ExecuteMode (lane)   │
//!                    │  • EngineConfig         │
//!                    └───────────┬─────────────┘
//!                                │
//!            ┌───────────────────┼───────────────────┐
//!            ▼                   ▼                   ▼
//!     ┌────────────┐      ┌────────────┐      ┌────────────┐
//!     │   Engine   │      │  Signals   │      │ View-models│
//!     │  (lanes)   │      │ (subjects) │      │  (login)   │
//!     └────────────┘      └────────────┘      └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`action`]: `ActionAndState`, `ActionAndError`, `ExecuteMode`
//! - [`reducer`]: the `Reducer` function type and stream helpers
//! - [`config`]: `EngineConfig` and its TOML/env resolution

pub mod action;
pub mod config;
pub mod reducer;

pub use action::{ActionAndError, ActionAndState, ActionError, BoxError, ExecuteMode};
pub use config::EngineConfig;
pub use reducer::{Reducer, ReducerStream};
