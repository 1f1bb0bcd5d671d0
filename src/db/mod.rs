use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::config::SecurityConfig;
use crate::entities::{email_validations, forgot_passwords, utubs};
use crate::models::throttle::{ResetThrottle, ValidationThrottle};

pub mod migrator;
pub mod repositories;

pub use repositories::user::{CreateUserError, User};

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        if !db_url.contains(":memory:") {
            let path_str = db_url.trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    fn user_repo(&self) -> repositories::user::UserRepository {
        repositories::user::UserRepository::new(self.conn.clone())
    }

    fn email_validation_repo(&self) -> repositories::email_validation::EmailValidationRepository {
        repositories::email_validation::EmailValidationRepository::new(self.conn.clone())
    }

    fn forgot_password_repo(&self) -> repositories::forgot_password::ForgotPasswordRepository {
        repositories::forgot_password::ForgotPasswordRepository::new(self.conn.clone())
    }

    fn utub_repo(&self) -> repositories::utub::UtubRepository {
        repositories::utub::UtubRepository::new(self.conn.clone())
    }

    // ========== Users ==========

    pub async fn create_user(
        &self,
        username: &str,
        email_lower: &str,
        password: &str,
        security: &SecurityConfig,
        now: DateTime<Utc>,
    ) -> Result<User, CreateUserError> {
        self.user_repo()
            .create(username, email_lower, password, security, now)
            .await
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.user_repo().get_by_username(username).await
    }

    pub async fn find_user_by_email(&self, email_lower: &str) -> Result<Option<User>> {
        self.user_repo().get_by_email(email_lower).await
    }

    pub async fn find_user_by_id(&self, id: i32) -> Result<Option<User>> {
        self.user_repo().get_by_id(id).await
    }

    pub async fn verify_user_password(&self, username: &str, password: &str) -> Result<bool> {
        self.user_repo().verify_password(username, password).await
    }

    pub async fn change_password(
        &self,
        user_id: i32,
        new_password: &str,
        security: &SecurityConfig,
    ) -> Result<()> {
        self.user_repo()
            .change_password(user_id, new_password, security)
            .await
    }

    // ========== Email validation ==========

    pub async fn attach_email_validation(
        &self,
        user_id: i32,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.email_validation_repo()
            .attach(user_id, token, now)
            .await
    }

    pub async fn get_email_validation(
        &self,
        user_id: i32,
    ) -> Result<Option<email_validations::Model>> {
        self.email_validation_repo().get(user_id).await
    }

    /// A user with no validation row is considered email-validated.
    pub async fn is_email_validated(&self, user_id: i32) -> Result<bool> {
        Ok(self.get_email_validation(user_id).await?.is_none())
    }

    pub async fn delete_email_validation(&self, user_id: i32) -> Result<()> {
        self.email_validation_repo().delete(user_id).await
    }

    pub async fn update_email_validation(
        &self,
        user_id: i32,
        token: Option<&str>,
        throttle: &ValidationThrottle,
    ) -> Result<()> {
        self.email_validation_repo()
            .update(user_id, token, throttle)
            .await
    }

    pub async fn update_email_validation_guarded(
        &self,
        user_id: i32,
        observed_last_attempt: Option<&str>,
        throttle: &ValidationThrottle,
    ) -> Result<bool> {
        self.email_validation_repo()
            .update_guarded(user_id, observed_last_attempt, throttle)
            .await
    }

    pub async fn complete_email_validation(&self, user_id: i32, now: DateTime<Utc>) -> Result<()> {
        self.email_validation_repo().complete(user_id, now).await
    }

    pub async fn find_email_validation_by_token(
        &self,
        token: &str,
    ) -> Result<Option<email_validations::Model>> {
        self.email_validation_repo().get_by_token(token).await
    }

    pub async fn purge_users_by_validation_token(&self, token: &str) -> Result<u64> {
        self.email_validation_repo()
            .purge_users_by_token(token)
            .await
    }

    // ========== Forgot password ==========

    pub async fn attach_forgot_password(
        &self,
        user_id: i32,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.forgot_password_repo().attach(user_id, token, now).await
    }

    pub async fn get_forgot_password(
        &self,
        user_id: i32,
    ) -> Result<Option<forgot_passwords::Model>> {
        self.forgot_password_repo().get(user_id).await
    }

    pub async fn delete_forgot_password(&self, user_id: i32) -> Result<()> {
        self.forgot_password_repo().delete(user_id).await
    }

    pub async fn delete_forgot_password_by_token(&self, token: &str) -> Result<bool> {
        self.forgot_password_repo().delete_by_token(token).await
    }

    pub async fn update_forgot_password(
        &self,
        user_id: i32,
        token: Option<&str>,
        throttle: &ResetThrottle,
    ) -> Result<()> {
        self.forgot_password_repo()
            .update(user_id, token, throttle)
            .await
    }

    // ========== UTubs (auth-gate target only) ==========

    pub async fn is_utub_member(&self, utub_id: i32, user_id: i32) -> Result<bool> {
        self.utub_repo().is_member(utub_id, user_id).await
    }

    pub async fn create_utub(
        &self,
        name: &str,
        creator_id: i32,
        now: DateTime<Utc>,
    ) -> Result<utubs::Model> {
        self.utub_repo().create(name, creator_id, now).await
    }

    pub async fn add_utub_member(
        &self,
        utub_id: i32,
        user_id: i32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.utub_repo().add_member(utub_id, user_id, now).await
    }
}
