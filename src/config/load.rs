use super::{default_config_path, default_state_root, ConfigError, EngineSettings};
use std::path::Path;

/// Loads and validates settings. A missing file at the default location yields
/// defaults; a missing file at an explicit path is an error.
pub fn load_settings(explicit: Option<&Path>) -> Result<EngineSettings, ConfigError> {
    let mut settings = match explicit {
        Some(path) => EngineSettings::from_path(path)?,
        None => {
            let path = default_config_path()?;
            if path.exists() {
                EngineSettings::from_path(&path)?
            } else {
                EngineSettings::default()
            }
        }
    };
    if settings.state_root.as_os_str().is_empty() {
        settings.state_root = default_state_root()?;
    }
    let config_dir = match explicit {
        Some(path) => path.parent().map(Path::to_path_buf),
        None => default_config_path()?.parent().map(Path::to_path_buf),
    };
    settings.catalog_path = settings.resolve_catalog_path(config_dir.as_deref());
    settings.validate()?;
    Ok(settings)
}
