//! Environment-driven configuration: CLI args layered over a `.env` file
//! and the process environment, assembled once at startup into a small
//! struct passed by reference into the components that need it.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "hpc-proxyd")]
#[command(author = "EBI-GDP")]
#[command(version)]
#[command(about = "Submission and lifecycle proxy in front of SLURM")]
struct Args {
    /// Path to a `.env` file to load before reading the environment
    #[arg(long, env = "DOTENV_FILE")]
    dotenv: Option<PathBuf>,

    /// Path to the SQLite registry database
    #[arg(long, default_value = "hpc-proxy.db")]
    db_path: PathBuf,

    /// Parse configuration and exit without starting the server
    #[arg(long)]
    dry_run: bool,
}

/// Process-wide configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub dry_run: bool,

    pub slurm_jwt_hs256_key_base64: String,
    pub slurm_rest_host: String,
    pub slurm_rest_api_data_parser_plugin_version: String,
    pub slurm_rest_jwt_expiration_time: i64,

    pub monitor_polling_interval_minutes: u64,
    pub monitor_job_created_at_max_age_minutes: i64,

    pub ssh_hostname: Option<String>,
    pub ssh_username: Option<String>,
    pub ssh_private_key_path: Option<PathBuf>,

    pub rabbitmq_host: String,
    pub rabbitmq_port: u16,
    pub rabbitmq_username: String,
    pub rabbitmq_password: String,
    pub rabbitmq_path: String,

    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,

    pub gmail_credentials_path: PathBuf,

    pub slack_bot_token: String,
    pub slack_channel: String,

    pub flask_app_host: String,
    pub flask_app_port: u16,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_or_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Parse CLI args, optionally load a `.env` file, then read the
    /// environment. Fails fast if `SLURM_JWT_HS256_KEY_BASE64` is absent.
    pub fn load() -> anyhow::Result<Self> {
        let args = Args::parse();

        let dotenv_path = args
            .dotenv
            .clone()
            .unwrap_or_else(|| PathBuf::from(".env"));
        if dotenv_path.exists() {
            dotenvy::from_path(&dotenv_path).ok();
        }

        let slurm_jwt_hs256_key_base64 = std::env::var("SLURM_JWT_HS256_KEY_BASE64")
            .map_err(|_| anyhow::anyhow!("SLURM_JWT_HS256_KEY_BASE64 environment variable not set"))?;

        let slurm_rest_host = env_or("SLURM_REST_HOST", "https://slurmapi.example.org");
        url::Url::parse(&slurm_rest_host)
            .map_err(|e| anyhow::anyhow!("SLURM_REST_HOST is not a valid URL: {e}"))?;

        Ok(Config {
            db_path: args.db_path,
            dry_run: args.dry_run,

            slurm_jwt_hs256_key_base64,
            slurm_rest_host,
            slurm_rest_api_data_parser_plugin_version: env_or(
                "SLURM_REST_API_DATA_PARSER_PLUGIN_VERSION",
                "0.0.42",
            ),
            slurm_rest_jwt_expiration_time: env_or_parse("SLURM_REST_JWT_EXPIRATION_TIME", 10),

            monitor_polling_interval_minutes: env_or_parse("MONITOR_POLLING_INTERVAL", 1),
            monitor_job_created_at_max_age_minutes: env_or_parse(
                "MONGODB_MONITOR_JOB_CREATED_AT_MAX_AGE",
                1440,
            ),

            ssh_hostname: std::env::var("SSH_HOSTNAME").ok(),
            ssh_username: std::env::var("SSH_USERNAME").ok(),
            ssh_private_key_path: std::env::var("SSH_PRIVATE_KEY_PATH").ok().map(PathBuf::from),

            rabbitmq_host: env_or("RABBITMQ_HOST", "localhost"),
            rabbitmq_port: env_or_parse("RABBITMQ_PORT", 5672),
            rabbitmq_username: env_or("RABBITMQ_USERNAME", "guest"),
            rabbitmq_password: env_or("RABBITMQ_PASSWORD", "guest"),
            rabbitmq_path: env_or("RABBITMQ_PATH", "/"),

            smtp_server: env_or("SMTP_SERVER", "smtp.example.com"),
            smtp_port: env_or_parse("SMTP_PORT", 587),
            smtp_username: env_or("SMTP_USERNAME", "username@example.com"),
            smtp_password: env_or("SMTP_PASSWORD", "api_token"),

            gmail_credentials_path: PathBuf::from(env_or(
                "GMAIL_CREDENTIALS_PATH",
                "gmail.credentials.json",
            )),

            slack_bot_token: env_or("SLACK_BOT_TOKEN", "api_token"),
            slack_channel: env_or("SLACK_CHANNEL", "channel_name"),

            flask_app_host: env_or("FLASK_APP_HOST", "0.0.0.0"),
            flask_app_port: env_or_parse("FLASK_APP_PORT", 5001),
        })
    }
}
