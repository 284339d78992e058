/// Form fields plus the token handed back by a successful login.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginState {
    pub username: String,
    pub password: String,
    pub token: Option<String>,
}

impl LoginState {
    /// Username of at least 5 characters, password of at least 3.
    pub fn is_form_valid(&self) -> bool {
        self.username.chars().count() > 4 && self.password.chars().count() > 2
    }
}
