use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use log::info;

/// Runtime configuration, loaded once at startup from environment
/// variables. Every value has a usable default so the server starts
/// with no configuration at all; mail sending stays disabled until the
/// SMTP relay is set.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the web server binds to.
    pub port: u16,

    /// Root directory for all persisted data (records, uploads, reports).
    pub data_dir: PathBuf,

    /// Lifetime of signed download links, in seconds.
    pub signed_url_ttl_secs: u64,

    /// Base URL of the external checkout function.
    pub checkout_url: String,

    /// URL the checkout redirects back to after a successful payment.
    pub payment_return_url: String,

    /// SMTP relay host. Mail is disabled when unset.
    pub smtp_relay: Option<String>,

    /// SMTP credentials.
    pub smtp_user: String,
    pub smtp_password: String,

    /// From address for outgoing mail.
    pub mail_from: String,

    /// Optional admin account seeded at startup, as `username:email:password`.
    pub seed_admin: Option<String>,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("PORTAL_PORT", "3000"),
            data_dir: PathBuf::from(try_load::<String>("PORTAL_DATA_DIR", "database")),
            signed_url_ttl_secs: try_load("PORTAL_SIGNED_URL_TTL", "900"),
            checkout_url: try_load(
                "PORTAL_CHECKOUT_URL",
                "http://localhost:9000/functions/checkout",
            ),
            payment_return_url: try_load(
                "PORTAL_RETURN_URL",
                "http://localhost:3000/api/payments/success",
            ),
            smtp_relay: env::var("PORTAL_SMTP_RELAY").ok(),
            smtp_user: try_load("PORTAL_SMTP_USER", ""),
            smtp_password: try_load("PORTAL_SMTP_PASSWORD", ""),
            mail_from: try_load("PORTAL_MAIL_FROM", "Formula Review <noreply@localhost>"),
            seed_admin: env::var("PORTAL_ADMIN_SEED").ok(),
        }
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse().unwrap_or_else(|e| {
        panic!("Invalid {key} value {raw:?}: {e}");
    })
}
