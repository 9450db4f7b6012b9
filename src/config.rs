use anyhow::Context;

/// Runtime settings, read once at startup from the environment (and `.env`).
#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    /// Base URL of the external identity provider.
    pub identity_url: String,
    /// Service key sent alongside every identity-provider call.
    pub identity_service_key: String,
    pub bind_addr: String,
    pub upload_dir: String,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: dotenv::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            identity_url: dotenv::var("IDENTITY_URL").context("IDENTITY_URL must be set")?,
            identity_service_key: dotenv::var("IDENTITY_SERVICE_KEY")
                .context("IDENTITY_SERVICE_KEY must be set")?,
            bind_addr: dotenv::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned()),
            upload_dir: dotenv::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads/scans".to_owned()),
        })
    }
}
