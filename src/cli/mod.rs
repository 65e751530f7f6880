//! Command-line interface.
//!
//! `serve`, or no subcommand at all, starts the server (handled in
//! `main.rs`). The other subcommands are offline helpers:
//! - `hash-password <password>` - print a hash in the configured scheme
//! - `config check` - validate and summarize the configuration file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::auth::PasswordVerifier;
use crate::config::{Config, RouteLimit};

/// CLI arguments structure
#[derive(Parser, Debug)]
#[command(name = "leadgate")]
#[command(author, version, about = "Lead intake and quote-tracking backend", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "LEADGATE_CONFIG", default_value = "leadgate.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Subcommand to run (if none, starts the server)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server (the default)
    Serve,

    /// Hash a password with the configured scheme, for seeding users by hand
    HashPassword {
        password: String,
    },

    /// Configuration management commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Check,
}

/// Pick the tracing filter directive: `--log-level` beats `RUST_LOG`,
/// which beats the configured level.
pub fn log_filter_directive(
    cli_level: Option<&str>,
    env_filter: Option<&str>,
    config_level: &str,
) -> String {
    cli_level
        .or(env_filter.filter(|v| !v.trim().is_empty()))
        .unwrap_or(config_level)
        .to_string()
}

/// Run a CLI command
pub async fn run_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Some(Commands::HashPassword { password }) => cmd_hash_password(cli, password).await,
        Some(Commands::Config(ConfigCommands::Check)) => cmd_config_check(cli),
        // Serving is handled in main.rs
        Some(Commands::Serve) | None => Ok(()),
    }
}

async fn cmd_hash_password(cli: &Cli, password: &str) -> Result<()> {
    let config = Config::load(&cli.config)?;
    let verifier = PasswordVerifier::new(&config.auth);
    let hash = verifier
        .hash_blocking(password)
        .await
        .context("Failed to hash password")?;
    println!("{}", hash);
    Ok(())
}

fn describe_limit(limit: &RouteLimit) -> String {
    format!("{} per {}s", limit.max_requests, limit.window_seconds)
}

fn cmd_config_check(cli: &Cli) -> Result<()> {
    let config_path = &cli.config;

    println!("Checking configuration file: {}", config_path.display());
    println!();

    if !config_path.exists() {
        println!(
            "[!!] Configuration file not found: {}",
            config_path.display()
        );
        println!();
        println!("A default configuration will be used when starting the server.");
        println!("To create a custom configuration, copy leadgate.example.toml to leadgate.toml");
        return Ok(());
    }

    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("[ERROR] Configuration file is invalid:");
            println!("  {:#}", e);
            std::process::exit(1);
        }
    };

    println!("[OK] Configuration file is valid!");
    println!();
    println!("Server:");
    println!("  Listen:         {}:{}", config.server.host, config.server.port);
    println!("  Data Dir:       {}", config.server.data_dir.display());
    println!("  Secure Cookies: {}", config.server.secure_cookies);
    println!();
    println!("Database:");
    println!("  Path:           {}", config.database.path);
    println!("  Query Timeout:  {}ms", config.database.query_timeout_ms);
    println!();
    println!("Auth:");
    println!("  Session TTL:    {}h", config.auth.session_ttl_hours);
    println!(
        "  Lockout:        {} failures, {} minutes",
        config.auth.lockout_threshold, config.auth.lockout_minutes
    );
    println!("  Hash Scheme:    {:?}", config.auth.password_scheme);
    println!(
        "  Server Secret:  {}",
        if config.auth.legacy_secret().is_some() {
            "configured"
        } else {
            "not set (legacy digests cannot be verified)"
        }
    );
    println!(
        "  Bootstrap Admin: {}",
        if config.auth.admin_password.is_some() {
            "configured"
        } else {
            "not configured"
        }
    );
    println!();
    println!("Rate Limiting:");
    println!("  Enabled:        {}", config.rate_limit.enabled);
    println!("  Backend:        {:?}", config.rate_limit.backend);
    println!("  Login:          {}", describe_limit(&config.rate_limit.login));
    println!("  Mutations:      {}", describe_limit(&config.rate_limit.mutation));
    println!("  Quote Create:   {}", describe_limit(&config.rate_limit.quote_create));
    println!("  Public Forms:   {}", describe_limit(&config.rate_limit.public_form));
    println!();
    println!("Email:");
    if config.email.is_configured() {
        println!(
            "  SMTP:           {}:{}",
            config.email.smtp_host.as_deref().unwrap_or_default(),
            config.email.smtp_port
        );
        println!(
            "  Recipient:      {}",
            config.email.recipient().unwrap_or("(none)")
        );
    } else {
        println!("  [!!] SMTP not configured; notifications will only be logged");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["leadgate"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("leadgate.toml"));
    }

    #[test]
    fn test_parses_explicit_serve() {
        let cli = Cli::try_parse_from(["leadgate", "--log-level", "debug", "serve"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Serve)));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_cli_log_level_overrides_env_and_config() {
        assert_eq!(
            log_filter_directive(Some("debug"), Some("warn"), "info"),
            "debug"
        );
        assert_eq!(log_filter_directive(None, Some("warn"), "info"), "warn");
        assert_eq!(log_filter_directive(None, Some("  "), "info"), "info");
        assert_eq!(log_filter_directive(None, None, "error"), "error");
    }

    #[test]
    fn test_parses_hash_password() {
        let cli = Cli::try_parse_from(["leadgate", "hash-password", "s3cret-pass"]).unwrap();
        match cli.command {
            Some(Commands::HashPassword { password }) => assert_eq!(password, "s3cret-pass"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parses_config_check_with_path() {
        let cli =
            Cli::try_parse_from(["leadgate", "-c", "/etc/leadgate.toml", "config", "check"])
                .unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Config(ConfigCommands::Check))
        ));
        assert_eq!(cli.config, PathBuf::from("/etc/leadgate.toml"));
    }
}
