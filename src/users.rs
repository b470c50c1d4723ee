//! Operator commands for accounts and bearer tokens.
//!
//! Backs `chathome user add`, `chathome user list` and `chathome token`.
//! Token issuance here is an operator surface, not a login flow.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;

use chathome_core::models::{Role, User};
use chathome_core::store::Store;

use crate::auth::IdentityGate;
use crate::config::Config;
use crate::migrate;
use crate::sqlite_store::SqliteStore;

/// Create a user record. Handles are unique.
pub async fn add_user(
    store: &dyn Store,
    handle: &str,
    display_name: &str,
    role: &str,
    secret: Option<String>,
) -> Result<User> {
    let handle = handle.trim();
    if handle.is_empty() {
        bail!("handle must not be empty");
    }
    let role: Role = role.parse()?;
    if store.find_user_by_handle(handle).await?.is_some() {
        bail!("a user with handle '{}' already exists", handle);
    }
    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        handle: handle.to_string(),
        display_name: display_name.trim().to_string(),
        role,
        secret,
        created_at: Utc::now(),
    };
    store.insert_user(&user).await?;
    Ok(user)
}

/// Sign a token for the user with `handle`.
pub async fn issue_token(
    store: Arc<dyn Store>,
    secret: &[u8],
    handle: &str,
    ttl_secs: u64,
) -> Result<String> {
    let user = store
        .find_user_by_handle(handle)
        .await?
        .with_context(|| format!("no user with handle '{}'", handle))?;
    Ok(IdentityGate::new(store, secret).issue(&user, ttl_secs)?)
}

pub async fn run_user_add(
    config: &Config,
    handle: &str,
    display_name: &str,
    role: &str,
    secret: Option<String>,
) -> Result<()> {
    let store = SqliteStore::new(migrate::run_migrations(config).await?);
    let user = add_user(&store, handle, display_name, role, secret).await?;
    println!("Created user {} ({}, {})", user.handle, user.role, user.id);
    Ok(())
}

pub async fn run_user_list(config: &Config) -> Result<()> {
    let store = SqliteStore::new(migrate::run_migrations(config).await?);
    let users = store.list_users().await?;
    if users.is_empty() {
        println!("No users.");
        return Ok(());
    }
    println!("{:<36}  {:<20}  {:<6}  NAME", "ID", "HANDLE", "ROLE");
    for u in users {
        println!(
            "{:<36}  {:<20}  {:<6}  {}",
            u.id, u.handle, u.role, u.display_name
        );
    }
    Ok(())
}

pub async fn run_token(config: &Config, handle: &str, ttl_secs: Option<u64>) -> Result<()> {
    let secret = config.auth.secret()?;
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(migrate::run_migrations(config).await?));
    let ttl = ttl_secs.unwrap_or(config.auth.token_ttl_secs);
    let token = issue_token(store, secret.as_bytes(), handle, ttl).await?;
    println!("{}", token);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::verify_token;
    use chathome_core::store::memory::InMemoryStore;

    #[tokio::test]
    async fn add_user_rejects_duplicates_and_bad_roles() {
        let store = InMemoryStore::new();
        let user = add_user(&store, "kai", "Kai", "kid", None).await.unwrap();
        assert_eq!(user.role, Role::Kid);
        assert!(add_user(&store, "kai", "Kai 2", "adult", None).await.is_err());
        assert!(add_user(&store, "zed", "Zed", "wizard", None).await.is_err());
        assert!(add_user(&store, "  ", "Blank", "adult", None).await.is_err());
    }

    #[tokio::test]
    async fn issued_token_verifies() {
        let store = Arc::new(InMemoryStore::new());
        let user = add_user(store.as_ref(), "pat", "Pat", "adult", None)
            .await
            .unwrap();
        let token = issue_token(store.clone(), b"secret", "pat", 60).await.unwrap();
        let claims = verify_token(b"secret", &token, Utc::now().timestamp()).unwrap();
        assert_eq!(claims.sub, user.id);
        assert!(issue_token(store, b"secret", "nobody", 60).await.is_err());
    }
}
