use std::env as stdenv;
use std::path::PathBuf;
use std::time::Duration;

/// Prompt template used when nothing else is configured.
pub const DEFAULT_PROMPT: &str = "WS$G";

/// Number of command lines kept in history.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Engine settings.
///
/// Built from [`Default`] and optionally patched from the process environment with
/// [`EngineConfig::from_env`]:
/// - `NATIVESH_HISTORY`: history capacity
/// - `NATIVESH_PROMPT`: initial prompt template
/// - `NATIVESH_ASSETS`: directory holding the `ascii/` art assets
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub history_capacity: usize,
    pub prompt_template: String,
    pub asset_dir: PathBuf,
    /// How long teardown waits for supervised tasks before aborting them.
    pub shutdown_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let asset_dir = stdenv::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            prompt_template: DEFAULT_PROMPT.to_string(),
            asset_dir,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `NATIVESH_*` variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = stdenv::var("NATIVESH_HISTORY") {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.history_capacity = n,
                _ => log::warn!("ignoring NATIVESH_HISTORY={raw:?}: expected a positive integer"),
            }
        }
        if let Ok(prompt) = stdenv::var("NATIVESH_PROMPT") {
            if !prompt.is_empty() {
                config.prompt_template = prompt;
            }
        }
        if let Some(dir) = stdenv::var_os("NATIVESH_ASSETS") {
            config.asset_dir = PathBuf::from(dir);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.history_capacity, 1000);
        assert_eq!(config.prompt_template, "WS$G");
        assert!(config.shutdown_grace > Duration::ZERO);
    }
}
