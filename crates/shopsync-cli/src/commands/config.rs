use std::path::Path;

use crate::commands::common::load_settings;
use crate::error::CliError;

pub fn run_config_show(config_path: &Path) -> Result<(), CliError> {
    let settings = load_settings(config_path)?;

    println!("Config file: {}", config_path.display());
    if !config_path.exists() {
        println!("(file not found; showing defaults)");
    }
    println!("{}", serde_json::to_string_pretty(&settings.redacted())?);
    Ok(())
}
