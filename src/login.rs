//! Login classification types.

use std::fmt;

use reqwest::Response;

/// Outcome of a login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStatus {
    /// The login-check probe observed the authenticated redirect.
    Success,
    /// No authenticated redirect was observed.
    Failure,
}

impl fmt::Display for LoginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginStatus::Success => write!(f, "Login Successful"),
            LoginStatus::Failure => write!(f, "Login Failed"),
        }
    }
}

/// The HTTP response to a login POST, paired with its classification.
///
/// Wraps the engine's response by composition rather than inheriting from it;
/// the response stays fully accessible through [`LoginResponse::response`] and
/// [`LoginResponse::into_response`].
#[derive(Debug)]
pub struct LoginResponse {
    status: LoginStatus,
    response: Response,
}

impl LoginResponse {
    pub(crate) fn new(status: LoginStatus, response: Response) -> Self {
        Self { status, response }
    }

    /// Returns the login classification.
    #[must_use]
    pub fn login_status(&self) -> LoginStatus {
        self.status
    }

    /// Returns whether the login was classified as successful.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == LoginStatus::Success
    }

    /// Returns the underlying HTTP response to the login POST.
    #[must_use]
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// Consumes the wrapper, yielding the underlying response (e.g. to read
    /// the body).
    #[must_use]
    pub fn into_response(self) -> Response {
        self.response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_status_display_strings() {
        assert_eq!(LoginStatus::Success.to_string(), "Login Successful");
        assert_eq!(LoginStatus::Failure.to_string(), "Login Failed");
    }
}
