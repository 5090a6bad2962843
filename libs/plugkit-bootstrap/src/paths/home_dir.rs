use std::{
    env, fs,
    path::{Path, PathBuf},
};

/// Errors for resolving the home directory
#[derive(Debug, thiserror::Error)]
pub enum HomeDirError {
    #[error("HOME environment variable is not set")]
    HomeMissing,
    #[error("APPDATA environment variable is not set")]
    AppDataMissing,
    #[error("home_dir must be an absolute path (after ~ expansion): {0}")]
    AbsoluteRequired(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Environment variable holding the user's home.
#[cfg(target_os = "windows")]
const USER_HOME_VAR: &str = "USERPROFILE";
#[cfg(not(target_os = "windows"))]
const USER_HOME_VAR: &str = "HOME";

/// Environment variable holding the parent of the default home directory.
#[cfg(target_os = "windows")]
const DEFAULT_BASE_VAR: &str = "APPDATA";
#[cfg(not(target_os = "windows"))]
const DEFAULT_BASE_VAR: &str = "HOME";

/// Normalize and resolve the host home directory.
///
/// - A configured path may start with `~`, which expands to the user's home; the
///   result must be absolute.
/// - Without a configured path: `%APPDATA%\<default_subdir>` on Windows,
///   `$HOME/<default_subdir>` elsewhere.
///
/// If `create` is true, the directory is created if missing.
pub fn resolve_home_dir(
    config_home: Option<String>,
    default_subdir: &str,
    create: bool,
) -> Result<PathBuf, HomeDirError> {
    let path = match config_home {
        Some(raw) => expand_configured(&raw, env::var(USER_HOME_VAR).ok())?,
        None => default_home(default_subdir, env::var(DEFAULT_BASE_VAR).ok())?,
    };

    if create {
        fs::create_dir_all(&path)?;
    }
    Ok(path)
}

fn expand_configured(raw: &str, user_home: Option<String>) -> Result<PathBuf, HomeDirError> {
    let expanded = match raw.strip_prefix('~') {
        Some(rest) => {
            let home = user_home.ok_or(HomeDirError::HomeMissing)?;
            let rest = rest.trim_start_matches(['/', '\\']);
            if rest.is_empty() {
                PathBuf::from(home)
            } else {
                Path::new(&home).join(rest)
            }
        }
        None => PathBuf::from(raw),
    };

    if !expanded.is_absolute() {
        return Err(HomeDirError::AbsoluteRequired(
            expanded.to_string_lossy().into(),
        ));
    }
    Ok(expanded)
}

fn default_home(default_subdir: &str, base: Option<String>) -> Result<PathBuf, HomeDirError> {
    let base = base.ok_or(if cfg!(target_os = "windows") {
        HomeDirError::AppDataMissing
    } else {
        HomeDirError::HomeMissing
    })?;
    Ok(Path::new(&base).join(default_subdir))
}
