use config::Config;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

mod args;
mod config;
mod output;
mod scene;
mod session;

use crate::args::get_command;

pub fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = get_command().get_matches();

    let cfg = match Config::from_args(args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            return;
        }
    };
    info!(ranks = cfg.ranks, frames = cfg.frames, "starting session");
    debug!(?cfg, "configuration");

    let out = match session::run(&cfg) {
        Ok(out) => out,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    match out.rgb {
        Some(rgb) => match output::write_ppm(&cfg.file_name, out.size, &rgb) {
            Ok(()) => info!(file = ?cfg.file_name, "image saved"),
            Err(e) => error!("cannot save image: {e}"),
        },
        None => info!("no color buffer, nothing saved"),
    }
}
