use std::io;
use std::path::Path;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

pub const DEFAULT_PASSWORD: &str = "courtbook";

/// Single shared password for every user; the wire carries the acting
/// identity per statement rather than per login.
#[derive(Debug)]
pub struct CourtbookAuthSource {
    password: String,
}

impl CourtbookAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for CourtbookAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

/// Server password: the contents of `password_file` when given (trailing
/// newline stripped), else `password`, else [`DEFAULT_PASSWORD`].
pub fn resolve_password(password: Option<String>, password_file: Option<&Path>) -> io::Result<String> {
    if let Some(path) = password_file {
        let raw = std::fs::read_to_string(path)?;
        let trimmed = raw.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("password file {} is empty", path.display()),
            ));
        }
        return Ok(trimmed.to_string());
    }
    Ok(password.unwrap_or_else(|| DEFAULT_PASSWORD.to_string()))
}
