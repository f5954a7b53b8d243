use anyhow::Context;
use tracing_subscriber::EnvFilter;
use vramfs::{Config, VramFs, VramFsFuse};

fn main() -> anyhow::Result<()> {
    let config = Config::load();

    let filter = match &config.log_level {
        Some(level) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid log filter {level:?}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let backend = vramfs::backend(&config);
    let pool = vramfs::provision_pool(backend, config.pool_size)
        .context("failed to provision GPU block pool")?;

    let fs = VramFsFuse::new(VramFs::new(pool));
    tracing::info!(
        "mounting vramfs on {} ({} bytes requested)",
        config.mountpoint.display(),
        config.pool_size
    );
    fuser::mount2(fs, &config.mountpoint, &vramfs::mount_options(&config))
        .with_context(|| format!("failed to mount {}", config.mountpoint.display()))?;
    Ok(())
}
