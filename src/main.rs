//! `hpc-proxyd` entrypoint: load configuration, wire the core components,
//! spawn the Poller, and serve the HTTP facade until shutdown.

mod catalog;
mod config;
mod error;
mod http;
mod notify;
mod poll;
mod registry;
mod rest;
mod schema;
mod ssh;
mod submit;
mod token;

use std::sync::Arc;

use log::info;

use crate::config::Config;
use crate::http::AppState;
use crate::notify::NotifierHub;
use crate::poll::Poller;
use crate::registry::Registry;
use crate::rest::RestClient;
use crate::ssh::SshClient;
use crate::token::TokenMinter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::load()?;
    info!("hpc-proxyd starting up, registry at {}", config.db_path.display());

    let minter = Arc::new(TokenMinter::new(
        &config.slurm_jwt_hs256_key_base64,
        config.slurm_rest_jwt_expiration_time,
    )?);
    let rest = Arc::new(RestClient::new(
        &config.slurm_rest_host,
        &config.slurm_rest_api_data_parser_plugin_version,
        minter,
    ));
    let registry = Arc::new(Registry::open(&config.db_path)?);
    let notifier = Arc::new(NotifierHub::from_config(&config));

    if config.dry_run {
        info!("dry run requested, configuration parsed successfully; exiting");
        return Ok(());
    }

    let ssh = match (&config.ssh_hostname, &config.ssh_username, &config.ssh_private_key_path) {
        (Some(hostname), Some(username), Some(key_path)) => {
            info!("ssh fallback transport configured for {hostname}, bypassing the SLURM REST API");
            Some(Arc::new(SshClient::connect(hostname, username, key_path)?))
        }
        _ => None,
    };

    let poller = match &ssh {
        Some(ssh) => Poller::with_ssh(
            registry.clone(),
            rest.clone(),
            notifier.clone(),
            ssh.clone(),
            config.monitor_polling_interval_minutes,
            config.monitor_job_created_at_max_age_minutes,
        ),
        None => Poller::new(
            registry.clone(),
            rest.clone(),
            notifier.clone(),
            config.monitor_polling_interval_minutes,
            config.monitor_job_created_at_max_age_minutes,
        ),
    };
    tokio::spawn(poller.run());

    let state = Arc::new(AppState {
        catalog: catalog::default_catalog(),
        rest,
        registry,
        notifier,
        ssh,
    });
    let app = http::router(state);

    let addr = format!("{}:{}", config.flask_app_host, config.flask_app_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
