use affirm_app::app::{run, AppConfig};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let config = AppConfig::from_env().unwrap_or_default();
    tracing::info!(data_dir = %config.data_dir().display(), "starting affirm");
    if let Err(err) = run(config) {
        eprintln!("Failed to start affirm: {err:#}");
    }
}
