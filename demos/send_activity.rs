//! Activity Email Example
//!
//! This example demonstrates how to:
//! - Configure a mailer for an implicit-TLS server (port 465)
//! - Render an HTML body from a handlebars template
//! - Send it to one visible recipient and handle the result

use std::collections::HashMap;

use integrations_tls_mailer::{Mailer, ServerConfig, SmtpError};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), SmtpError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("integrations_tls_mailer=debug"))
        .init();

    let config = ServerConfig::builder()
        .host("smtp.example.com")
        .port(465)
        .credentials("user@example.com", "your-password")
        .build()?;

    let mailer = Mailer::configure(config)?;

    let bindings = HashMap::from([("year".to_string(), "2019".to_string())]);
    let template = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/templates/activity.html");

    println!("Sending activity email...");
    let result = mailer
        .prepare("Activity", "recipient@example.com", "Your yearly activity")?
        .with_template(template, &bindings)?
        .send()
        .await;

    match result {
        Ok(()) => println!("Email sent successfully!"),
        Err(e) => {
            eprintln!("Failed to send email: {}", e);
            if e.is_retryable() {
                eprintln!("  The failure is transient; retrying later may succeed.");
            }
            return Err(e);
        }
    }

    Ok(())
}
