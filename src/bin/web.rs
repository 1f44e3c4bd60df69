use formula_portal::app;
use formula_portal::config::Config;

/// Main entry point for the web application
///
/// Loads the runtime configuration from the environment and starts the
/// portal server.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Config::load();
    app::run(config).await
}
