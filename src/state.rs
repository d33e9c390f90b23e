use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::auth::jwt::JwtKeys;
use crate::config::AppConfig;
use crate::mailer::{self, Mailer};
use crate::users::{memory::MemoryUserStore, repo::PgUserStore, repo::UserStore};

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub keys: JwtKeys,
    pub mailer: Arc<dyn Mailer>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Connects to Postgres, applies migrations and wires the mailer.
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .context("run migrations")?;

        let mailer = mailer::from_config(&config.mail);
        Ok(Self::from_parts(
            config,
            Arc::new(PgUserStore::new(db)),
            mailer,
        ))
    }

    pub fn from_parts(
        config: AppConfig,
        users: Arc<dyn UserStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            keys: JwtKeys::new(&config.jwt),
            users,
            mailer,
            config: Arc::new(config),
        }
    }

    /// In-memory store and a logging mailer; no network or database.
    pub fn fake() -> Self {
        Self::from_parts(
            AppConfig::for_tests(),
            Arc::new(MemoryUserStore::new()),
            Arc::new(mailer::LogMailer),
        )
    }
}
