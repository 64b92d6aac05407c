use tempest_core::config::Config;
use tempest_core::engine::Engine;
use tempest_core::init_logging;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let _guard = init_logging(&config);

    tracing::info!("Booting tempest...");

    let outcome = Engine::new(config).run_with_timeout().await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    tracing::info!("Shutdown complete.");
    Ok(())
}
