pub mod error;

pub use error::*;

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Environment variable pointing directly at a configuration file
pub const CONFIG_PATH_ENV: &str = "HOSTFLOW_CONFIG_PATH";

const CANDIDATES: [&str; 2] = ["hostflow.local.yaml", "hostflow.yaml"];

/// Get the hostflow configuration directory, creating it when missing
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("hostflow");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Find the hostflow configuration file
///
/// Search order:
/// 1. `HOSTFLOW_CONFIG_PATH` (direct path)
/// 2. current directory: `hostflow.local.yaml`, `hostflow.yaml`
/// 3. `./.hostflow/hostflow.yaml`
/// 4. `~/.config/hostflow/hostflow.yaml` (global)
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(path = %path.display(), "{} points to a missing file", CONFIG_PATH_ENV);
    }

    let current_dir = std::env::current_dir()?;

    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let local_dir = current_dir.join(".hostflow").join("hostflow.yaml");
    if local_dir.exists() {
        return Ok(local_dir);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("hostflow").join("hostflow.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// Load a YAML configuration file, expanding `${VAR}` references
pub fn load_from<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)?;
    let expanded = expand_env(&raw)?;
    tracing::debug!(path = %path.display(), "Loaded configuration file");
    serde_yaml::from_str(&expanded).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Discover the configuration file and load it
///
/// Returns `T::default()` when no file exists anywhere.
pub fn load<T: DeserializeOwned + Default>() -> Result<T> {
    match find_config_file() {
        Ok(path) => load_from(&path),
        Err(ConfigError::ConfigFileNotFound) => {
            tracing::debug!("No configuration file found, using defaults");
            Ok(T::default())
        }
        Err(e) => Err(e),
    }
}

/// Replace `${VAR}` with the value of the environment variable `VAR`
///
/// `${VAR:-fallback}` uses `fallback` when `VAR` is unset. `$$` is a
/// literal `$`.
pub fn expand_env(input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(stripped) = after.strip_prefix('$') {
            out.push('$');
            rest = stripped;
        } else if let Some(body) = after.strip_prefix('{') {
            let end = body.find('}').ok_or(ConfigError::UnterminatedReference)?;
            let reference = &body[..end];
            let (name, fallback) = match reference.split_once(":-") {
                Some((name, fallback)) => (name, Some(fallback)),
                None => (reference, None),
            };

            match (std::env::var(name), fallback) {
                (Ok(value), _) => out.push_str(&value),
                (Err(_), Some(fallback)) => out.push_str(fallback),
                (Err(_), None) => {
                    return Err(ConfigError::MissingEnvVar {
                        name: name.to_string(),
                    });
                }
            }
            rest = &body[end + 1..];
        } else {
            out.push('$');
            rest = after;
        }
    }

    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serial_test::serial;
    use std::fs;

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(default)]
        token: String,
        #[serde(default)]
        workers: usize,
    }

    #[test]
    fn test_get_config_dir() {
        let config_dir = get_config_dir().unwrap();
        assert!(config_dir.ends_with("hostflow"));
        assert!(config_dir.exists());
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("hostflow.yaml"), "workers: 2").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file();

        std::env::set_current_dir(original_dir).unwrap();
        assert!(result.unwrap().ends_with("hostflow.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_local_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("hostflow.yaml"), "workers: 2").unwrap();
        fs::write(temp_dir.path().join("hostflow.local.yaml"), "workers: 3").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file();

        std::env::set_current_dir(original_dir).unwrap();
        assert!(result.unwrap().ends_with("hostflow.local.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_hostflow_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        let dir = temp_dir.path().join(".hostflow");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("hostflow.yaml"), "workers: 2").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file();

        std::env::set_current_dir(original_dir).unwrap();
        assert!(result.unwrap().ends_with(".hostflow/hostflow.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.yaml");
        fs::write(&config_path, "workers: 2").unwrap();

        unsafe {
            std::env::set_var(CONFIG_PATH_ENV, config_path.to_str().unwrap());
        }

        let result = find_config_file();

        unsafe {
            std::env::remove_var(CONFIG_PATH_ENV);
        }
        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    #[serial]
    fn test_load_with_env_expansion() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("hostflow.yaml");
        fs::write(&path, "token: ${HOSTFLOW_TEST_TOKEN}\nworkers: ${HOSTFLOW_TEST_WORKERS:-4}\n")
            .unwrap();

        unsafe {
            std::env::set_var("HOSTFLOW_TEST_TOKEN", "abc123");
            std::env::remove_var("HOSTFLOW_TEST_WORKERS");
        }

        let sample: Sample = load_from(&path).unwrap();

        unsafe {
            std::env::remove_var("HOSTFLOW_TEST_TOKEN");
        }
        assert_eq!(sample.token, "abc123");
        assert_eq!(sample.workers, 4);
    }

    #[test]
    #[serial]
    fn test_missing_env_var_is_an_error() {
        unsafe {
            std::env::remove_var("HOSTFLOW_TEST_UNSET");
        }
        let result = expand_env("token: ${HOSTFLOW_TEST_UNSET}");
        assert!(matches!(
            result,
            Err(ConfigError::MissingEnvVar { name }) if name == "HOSTFLOW_TEST_UNSET"
        ));
    }

    #[test]
    fn test_expand_env_literals() {
        assert_eq!(expand_env("price: $$5").unwrap(), "price: $5");
        assert_eq!(expand_env("plain $HOME text").unwrap(), "plain $HOME text");
        assert!(matches!(
            expand_env("broken ${NAME"),
            Err(ConfigError::UnterminatedReference)
        ));
    }

    #[test]
    fn test_parse_error_names_the_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("hostflow.yaml");
        fs::write(&path, "workers: [not a number").unwrap();

        let err = load_from::<Sample>(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("hostflow.yaml"));
    }
}
