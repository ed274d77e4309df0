use std::error::Error;

use simba::logger;
use simba::settings::Settings;

/// Load the layered settings, report any problem with them and print the effective configuration.
///
/// Usage: `simba [CONFIG_PATH]`
fn main() -> Result<(), Box<dyn Error>> {
    let config_path = std::env::args().nth(1);
    let settings = Settings::new(config_path)?;

    logger::setup(settings.log_level.as_deref())?;
    settings.validate_and_warn();
    settings.optimizer.check()?;

    log::info!(
        "Optimizer configured for {} rounds with {} concurrent executions",
        settings.optimizer.max_steps,
        settings.optimizer.max_concurrency
    );
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}
