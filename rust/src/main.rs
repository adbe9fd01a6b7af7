use anyhow::{anyhow, Context, Result};
use env_logger::Env;
use image_doctor::config_store::ConfigStore;
use image_doctor::path_utils::{get_base_dir, resolve_config_path};
use image_doctor::pipeline::GenerationPipeline;
use image_doctor::server::{AppServer, AppState};
use std::env;
use std::sync::Arc;

struct Args {
    config: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = parse_args();
    let base_dir = get_base_dir();
    if dotenv::from_path(base_dir.join(".env")).is_err() {
        dotenv::dotenv().ok();
    }

    let config_path = resolve_config_path(args.config, &base_dir);
    let config = ConfigStore::new(config_path.clone())
        .with_context(|| format!("config error: {}", config_path.display()))?;

    let api_key_env = config.api_key_env();
    let api_key = env::var(&api_key_env)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("{api_key_env} is not set; add it to the environment or .env"))?;

    let settings = config.generator_settings();
    let pipeline = GenerationPipeline::from_settings(&settings, &api_key)?;
    if !pipeline.doctoring_enabled() {
        log::warn!("prompt doctoring is disabled; raw prompts go straight to {}", settings.image_model);
    }

    let state = Arc::new(AppState::new(pipeline, config.session_idle()));
    let mut server = AppServer::start(state, config.server_port())
        .context("failed to start local server")?;
    log::info!("listening on http://127.0.0.1:{}/", server.port());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;
    runtime
        .block_on(tokio::signal::ctrl_c())
        .context("failed to wait for ctrl-c")?;

    log::info!("shutting down");
    server.stop();
    Ok(())
}

fn parse_args() -> Args {
    let mut config = None;
    let mut args = env::args().skip(1).peekable();

    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(value) = args.next() {
                config = Some(value);
            }
        }
    }

    Args { config }
}
