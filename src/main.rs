use anyhow::Result;
use log::{error, info};
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};
use smtpserve::{load_tls_config, Server};
use std::env;

fn env_flag(name: &str) -> bool {
    match env::var(name) {
        Ok(value) => value == "1" || value.eq_ignore_ascii_case("true"),
        Err(_) => false,
    }
}

fn main() -> Result<()> {
    let config = ConfigBuilder::new()
        .add_filter_allow_str("smtpserve")
        .build();
    TermLogger::init(LevelFilter::Debug, config, TerminalMode::Mixed, ColorChoice::Auto)?;

    let mut server = Server::new(|message| {
        info!("Received {} from {}: {}", message.id, message.from, message.body_text());
        Ok(())
    });
    if let Ok(addr) = env::var("SMTP_ADDR") {
        server.with_addr(addr);
    }
    server.with_name(env::var("SMTP_HOSTNAME").unwrap_or_else(|_| "smtp.example.org".to_string()));
    server.with_debug(env_flag("SMTP_DEBUG"));

    if let (Ok(cert), Ok(key)) = (env::var("SMTP_CERT_FILE"), env::var("SMTP_KEY_FILE")) {
        match load_tls_config(&cert, &key) {
            Ok(tls) => {
                info!("[SMTP] Loaded cert: {}", cert);
                server.with_tls(tls);
            }
            Err(e) => error!("[SMTP] Failed to load cert: {:#}", e),
        }
    }

    if let (Ok(username), Ok(password)) = (env::var("SMTP_USERNAME"), env::var("SMTP_PASSWORD")) {
        server.with_authenticator(move |user, pass| {
            anyhow::ensure!(user == username && pass == password, "invalid credentials");
            Ok(())
        });
    }

    server.serve()
}
