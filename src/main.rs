use redis_showcase::config::Config;
use redis_showcase::{report, runner};

use tracing::subscriber;
use tracing_subscriber::FmtSubscriber;
use tokio::signal;

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level())
        .finish();
    subscriber::set_global_default(subscriber)?;

    let reports = runner::run(&config, signal::ctrl_c()).await?;
    println!("{}", report::render(&reports));

    let failed = reports.iter().filter(|r| !r.passed()).count();
    if failed > 0 {
        anyhow::bail!("{} scenario(s) reported mismatches", failed);
    }

    Ok(())
}
