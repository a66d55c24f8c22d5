use std::path::PathBuf;

const APP_DIR: &str = "station-link";

/// Points both the data and the config directory at one folder.  Handy for
/// running several panels side by side against different backends.
pub const HOME_ENV: &str = "STATION_LINK_HOME";

fn home_override() -> Option<PathBuf> {
    std::env::var_os(HOME_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Logs and other runtime files.
pub fn data_dir() -> PathBuf {
    if let Some(home) = home_override() {
        return home;
    }
    // ~/.local/share/station-link on every unix, macOS included
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| std::env::temp_dir())
            .join(".local")
            .join("share")
            .join(APP_DIR)
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn config_dir() -> PathBuf {
    if let Some(home) = home_override() {
        return home;
    }
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join(APP_DIR)
    }
    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

/// Log file for a binary, inside [`data_dir`].
pub fn log_path(binary: &str) -> PathBuf {
    data_dir().join(format!("{}.log", binary))
}
