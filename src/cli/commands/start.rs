use crate::cli::args::StartArgs;
use crate::core::config::Config;
use crate::core::runtime::Runtime;
use crate::core::time::SystemClock;
use crate::ops::telemetry;
use anyhow::Result;

pub async fn run_start(args: StartArgs) -> Result<()> {
    let have_config = args.config.exists();
    let config = if have_config {
        Config::load(&args.config)?
    } else {
        Config::default()
    };
    telemetry::init_tracing(config.telemetry.log_level.as_deref())?;
    if !have_config {
        tracing::warn!("config {} not found, using defaults", args.config.display());
    }
    Runtime::new(config, SystemClock)?.serve().await
}
