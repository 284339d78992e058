//! # Login
//!
//! A small view-model exercising the engine end to end: two form fields
//! edited on the default lane, and a `Login` action that calls an async
//! service on the deferred lane while holding the loading signal.

pub mod action;
pub mod service;
pub mod state;
pub mod view_model;

pub use action::LoginAction;
pub use service::{LoginService, MockLoginService, ServiceError};
pub use state::LoginState;
pub use view_model::LoginViewModel;
