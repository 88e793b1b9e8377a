use anyhow::Context;
use handview::config::Config;

#[handview::main]
fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    log::info!(
        "starting with model {} on {} delegate",
        config.model_path.display(),
        config.delegate,
    );
    handview::app::run(config)
}
