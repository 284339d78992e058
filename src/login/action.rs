use std::fmt;

#[derive(Clone, PartialEq, Eq)]
pub enum LoginAction {
    SetUsername(String),
    SetPassword(String),
    Login,
}

// Actions are logged with `{:?}`; the password never is.
impl fmt::Debug for LoginAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginAction::SetUsername(name) => f.debug_tuple("SetUsername").field(name).finish(),
            LoginAction::SetPassword(_) => f.debug_tuple("SetPassword").field(&"<redacted>").finish(),
            LoginAction::Login => write!(f, "Login"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", LoginAction::SetPassword("p@ssWord".into()));
        assert!(!rendered.contains("p@ssWord"));
        assert!(rendered.starts_with("SetPassword"));

        let rendered = format!("{:#?}", LoginAction::SetPassword("p@ssWord".into()));
        assert!(!rendered.contains("p@ssWord"));
    }

    #[test]
    fn test_debug_keeps_username() {
        let rendered = format!("{:?}", LoginAction::SetUsername("joseph".into()));
        assert_eq!(rendered, "SetUsername(\"joseph\")");
    }
}
