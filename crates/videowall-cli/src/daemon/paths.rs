//! Filesystem locations: socket, PID file, config file and preset document.
//!
//! Socket directory, first match wins:
//! 1. `VIDEOWALL_SOCKET_DIR`
//! 2. `XDG_RUNTIME_DIR/videowall`
//! 3. `~/.videowall`
//! 4. `{temp}/videowall`
//!
//! Several daemons can run side by side under different instance names
//! (`VIDEOWALL_INSTANCE`, default `default`); each gets
//! `{socket_dir}/{instance}.sock` and `{instance}.pid`.

use std::env;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "videowall";

/// Current instance name from env or default.
pub fn get_instance() -> String {
    env::var("VIDEOWALL_INSTANCE").unwrap_or_else(|_| "default".to_string())
}

fn non_empty_env(name: &str) -> Option<PathBuf> {
    env::var(name).ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// Socket directory with priority fallback. Empty variables are ignored.
pub fn get_socket_dir() -> PathBuf {
    if let Some(dir) = non_empty_env("VIDEOWALL_SOCKET_DIR") {
        return dir;
    }
    if let Some(runtime_dir) = non_empty_env("XDG_RUNTIME_DIR") {
        return runtime_dir.join(APP_DIR);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".videowall");
    }
    env::temp_dir().join(APP_DIR)
}

/// Keep instance names to `[A-Za-z0-9_-]`, not starting with `-`, so they
/// cannot escape the socket directory. Anything else becomes `default`.
pub(crate) fn sanitize_instance_name(name: &str) -> String {
    let is_valid = !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if is_valid {
        name.to_string()
    } else {
        tracing::warn!(
            "Invalid instance name '{}', using 'default'. Names must contain only alphanumeric, hyphen, underscore.",
            name
        );
        "default".to_string()
    }
}

fn instance_file(instance: Option<&str>, extension: &str) -> PathBuf {
    let name = instance.map(String::from).unwrap_or_else(get_instance);
    get_socket_dir().join(format!("{}.{}", sanitize_instance_name(&name), extension))
}

/// Socket path for an instance (current instance if `None`).
pub fn get_socket_path(instance: Option<&str>) -> PathBuf {
    instance_file(instance, "sock")
}

/// PID file path for an instance (current instance if `None`).
pub fn get_pid_path(instance: Option<&str>) -> PathBuf {
    instance_file(instance, "pid")
}

/// Ensure the socket directory exists, private to the user on Unix.
pub fn ensure_socket_dir() -> std::io::Result<()> {
    let dir = get_socket_dir();
    std::fs::create_dir_all(&dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
    }

    Ok(())
}

/// Where the config comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLocation {
    /// Given with `--config` or `VIDEOWALL_CONFIG`; must exist.
    Explicit(PathBuf),
    /// The per-user default; used only if present.
    Default(PathBuf),
    /// No config directory could be determined.
    None,
}

/// Resolve the config file: `--config`, then `VIDEOWALL_CONFIG`, then
/// `{config_dir}/videowall/config.json`.
pub fn get_config_location(flag: Option<&Path>) -> ConfigLocation {
    if let Some(path) = flag {
        return ConfigLocation::Explicit(path.to_path_buf());
    }
    if let Some(path) = non_empty_env("VIDEOWALL_CONFIG") {
        return ConfigLocation::Explicit(path);
    }
    let config_dir = non_empty_env("XDG_CONFIG_HOME").or_else(dirs::config_dir);
    match config_dir {
        Some(dir) => ConfigLocation::Default(dir.join(APP_DIR).join("config.json")),
        None => ConfigLocation::None,
    }
}

/// Default preset document: `{data_dir}/videowall/presets.json`, else
/// `~/.videowall/presets.json`.
pub fn default_presets_path() -> PathBuf {
    if let Some(dir) = non_empty_env("XDG_DATA_HOME").or_else(dirs::data_dir) {
        return dir.join(APP_DIR).join("presets.json");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".videowall").join("presets.json");
    }
    env::temp_dir().join(APP_DIR).join("presets.json")
}
