use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Message, SmtpTransport, Transport};
use rand::Rng;
use std::error::Error;

use crate::config::Config;

pub struct Mailer {
    smtp: SmtpTransport,
    from: String,
}

impl Mailer {
    /// Build a mailer from the configured SMTP relay. Fails when no
    /// relay is configured, which callers treat as mail being disabled.
    pub fn from_config(config: &Config) -> Result<Self, Box<dyn Error>> {
        let relay = config
            .smtp_relay
            .as_deref()
            .ok_or("SMTP relay is not configured")?;

        let creds = Credentials::new(config.smtp_user.clone(), config.smtp_password.clone());
        let tls_parameters = TlsParameters::new(relay.to_string())?;

        let smtp = SmtpTransport::relay(relay)?
            .credentials(creds)
            .port(465)
            .tls(Tls::Wrapper(tls_parameters))
            .build();

        Ok(Mailer {
            smtp,
            from: config.mail_from.clone(),
        })
    }

    pub fn send_password_reset(&self, to_email: &str, reset_code: &str) -> Result<(), Box<dyn Error>> {
        let email = Message::builder()
            .from(self.from.parse()?)
            .to(to_email.parse()?)
            .subject("Password Reset Request")
            .body(format!(
                "Your password reset code is: {}\nThis code will expire in 1 hour.",
                reset_code
            ))?;

        self.smtp.send(&email)?;
        Ok(())
    }

    /// Notify a customer that their review report is ready. The
    /// download link is included when a report has been generated.
    pub fn send_report_ready(
        &self,
        to_email: &str,
        product_name: &str,
        link: Option<&str>,
    ) -> Result<(), Box<dyn Error>> {
        let product = if product_name.trim().is_empty() {
            "your formula"
        } else {
            product_name
        };

        let mut body = format!("The regulatory review of {product} is complete.\n");
        match link {
            Some(link) => body.push_str(&format!("You can download the report here: {link}\n")),
            None => body.push_str("Log in to the portal to view the results.\n"),
        }

        let email = Message::builder()
            .from(self.from.parse()?)
            .to(to_email.parse()?)
            .subject("Your formula review is complete")
            .body(body)?;

        self.smtp.send(&email)?;
        Ok(())
    }
}

pub fn generate_reset_code() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();

    (0..8)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}
