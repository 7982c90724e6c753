use std::collections::HashSet;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

use crate::model::UserId;

/// Answers "may this user act as an administrator?".
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn is_admin(&self, user: UserId) -> bool;
}

/// Fixed admin list, loaded once from configuration.
#[derive(Debug, Default, Clone)]
pub struct StaticAuthorizer {
    admins: HashSet<UserId>,
}

impl StaticAuthorizer {
    pub fn new(admins: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            admins: admins.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn is_admin(&self, user: UserId) -> bool {
        self.admins.contains(&user)
    }
}

/// Shared-password login for the wire front-end. The session user name is
/// the caller's id and is parsed per statement.
#[derive(Debug)]
pub struct ReservdAuthSource {
    password: String,
}

impl ReservdAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for ReservdAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn only_listed_users_are_admins() {
        let admin = Ulid::new();
        let authz = StaticAuthorizer::new([admin]);
        assert!(authz.is_admin(admin).await);
        assert!(!authz.is_admin(Ulid::new()).await);
        assert!(!StaticAuthorizer::default().is_admin(admin).await);
    }
}
