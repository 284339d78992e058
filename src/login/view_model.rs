use std::sync::Arc;

use crate::core::action::{BoxError, ExecuteMode};
use crate::core::reducer::{self, ReducerStream};
use crate::engine::{Signals, StateReader, ViewModel};
use crate::signal::{Binding, Signal};

use super::action::LoginAction;
use super::service::{LoginService, MockLoginService};
use super::state::LoginState;

pub struct LoginViewModel {
    service: Arc<dyn LoginService>,
}

impl LoginViewModel {
    pub fn new(service: Arc<dyn LoginService>) -> Self {
        Self { service }
    }
}

impl Default for LoginViewModel {
    fn default() -> Self {
        Self::new(Arc::new(MockLoginService::default()))
    }
}

impl ViewModel for LoginViewModel {
    type Action = LoginAction;
    type State = LoginState;

    fn initial_state(&self) -> LoginState {
        LoginState::default()
    }

    fn reducers(
        &self,
        action: &LoginAction,
        state: &StateReader<LoginState>,
    ) -> Option<ReducerStream<LoginState>> {
        let stream = match action {
            LoginAction::SetUsername(username) => {
                let username = username.clone();
                reducer::just(move |s: LoginState| LoginState { username, ..s })
            }
            LoginAction::SetPassword(password) => {
                let password = password.clone();
                reducer::just(move |s: LoginState| LoginState { password, ..s })
            }
            LoginAction::Login => {
                let service = Arc::clone(&self.service);
                let state = state.clone();
                reducer::from_future(async move {
                    // Read credentials when the login actually starts, after
                    // every edit queued ahead of it has landed.
                    let LoginState {
                        username, password, ..
                    } = state.snapshot();
                    let token = service.login(&username, &password).await?;
                    Ok::<_, BoxError>(reducer::reducer(move |s: LoginState| LoginState {
                        token: Some(token),
                        ..s
                    }))
                })
            }
        };
        Some(stream)
    }

    fn show_spinner(&self, action: &LoginAction) -> bool {
        matches!(action, LoginAction::Login)
    }

    fn execute_mode(&self, action: &LoginAction) -> Option<ExecuteMode> {
        match action {
            LoginAction::Login => Some(ExecuteMode::DeferredParallel),
            _ => Some(ExecuteMode::OrderedParallel),
        }
    }
}

// ============================================================================
// Derived signals
// ============================================================================

/// Whether the form can be submitted, de-duplicated.
pub fn form_valid(signals: &Signals<LoginAction, LoginState>) -> Signal<bool> {
    signals.state_map(LoginState::is_form_valid)
}

/// `true` while a login request is out.
pub fn logging_in(signals: &Signals<LoginAction, LoginState>) -> Signal<bool> {
    signals.loading_for(|action| matches!(action, LoginAction::Login))
}

/// The token of every successful login.
pub fn logged_in(signals: &Signals<LoginAction, LoginState>) -> Signal<String> {
    signals.on_complete_map(
        |action| matches!(action, LoginAction::Login),
        |state| state.token.clone(),
    )
}

/// Lazily connected form-validity binding for UI observers.
pub fn form_valid_binding(signals: &Signals<LoginAction, LoginState>) -> Binding<bool> {
    let signals = signals.clone();
    Binding::new(move || form_valid(&signals))
}
