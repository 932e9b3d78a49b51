//! Entry point for `dtest-autoscaler`: polls the master's queue backlog and
//! resizes the slave fleet through an external fleet-management command.

use dist_test::autoscaler::Autoscaler;
use dist_test::infrastructure::config::ConfigLoader;
use dist_test::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::load()?;
    let _logger = LoggerImpl::init(&config.logging)?;

    let initial_size = Autoscaler::read_current_size(&config.autoscaler).await?;
    tracing::info!(initial_size, "autoscaler starting");
    let mut autoscaler = Autoscaler::new(config.autoscaler, initial_size);
    autoscaler.run().await;
    Ok(())
}
