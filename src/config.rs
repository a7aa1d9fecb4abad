use std::env;
use std::path::PathBuf;

/// Process-wide configuration, read once in `main` and shared with every
/// handler through `web::Data`.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// Origin of the static storefront; checkout success/cancel URLs point
    /// back at it.
    pub client_url: String,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    /// Shared secret for the admin bearer token.
    pub admin_token: String,
    /// Email delivery degrades to a log-only no-op when unset.
    pub sendgrid_api_key: Option<String>,
    pub email_from: String,
    pub upload_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .expect("PORT must be a valid number"),
            client_url: env::var("CLIENT_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:5500".to_string()),
            stripe_secret_key: env::var("STRIPE_SECRET_KEY")
                .expect("STRIPE_SECRET_KEY must be set"),
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET")
                .expect("STRIPE_WEBHOOK_SECRET must be set"),
            admin_token: env::var("ADMIN_TOKEN").expect("ADMIN_TOKEN must be set"),
            sendgrid_api_key: env::var("SENDGRID_API_KEY").ok(),
            email_from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "orders@sewingshop.example".to_string()),
            upload_dir: env::var("UPLOAD_DIR")
                .unwrap_or_else(|_| "uploads".to_string())
                .into(),
        }
    }
}
