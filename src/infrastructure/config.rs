use crate::domain::{
    config::{BoardConfig, GlobalConfig, ReplBoardConfig},
    error::{BoardError, BoardResult},
};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = ".replboard";
const CONFIG_FILE: &str = "config.toml";

/// Configuration manager
pub struct ConfigManager {
    global_config_path: PathBuf,
    project_config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create new configuration manager
    pub fn new() -> BoardResult<Self> {
        let global_config_path = Self::get_global_config_path()?;
        let project_config_path = Self::find_project_config_path();

        Ok(Self {
            global_config_path,
            project_config_path,
        })
    }

    /// Manager over explicit files instead of the home and project lookups.
    pub fn with_paths(global_config_path: PathBuf, project_config_path: Option<PathBuf>) -> Self {
        Self {
            global_config_path,
            project_config_path,
        }
    }

    /// Load configuration from files
    pub fn load_config(&self) -> BoardResult<ReplBoardConfig> {
        let mut config = ReplBoardConfig::default();

        // Global file contributes settings and boards
        if self.global_config_path.exists() {
            let global_config = self.load_config_from_path(&self.global_config_path)?;
            config.global = global_config.global;
            config.boards = global_config.boards;
        }

        // Project boards override global boards of the same name
        if let Some(project_path) = &self.project_config_path {
            if project_path.exists() {
                let project_config = self.load_config_from_path(project_path)?;
                for board in project_config.boards {
                    config.boards.retain(|existing| existing.name != board.name);
                    config.boards.push(board);
                }
            }
        }

        Ok(config)
    }

    /// Save configuration to files
    pub fn save_config(&self, config: &ReplBoardConfig) -> BoardResult<()> {
        match &self.project_config_path {
            Some(project_path) => {
                let global_config = ReplBoardConfig {
                    global: config.global.clone(),
                    boards: Vec::new(),
                };
                self.save_config_to_path(&self.global_config_path, &global_config)?;

                let project_config = ReplBoardConfig {
                    global: GlobalConfig::default(),
                    boards: config.boards.clone(),
                };
                self.save_config_to_path(project_path, &project_config)
            }
            None => self.save_config_to_path(&self.global_config_path, config),
        }
    }

    /// Look up a board by name in the merged configuration.
    pub fn find_board(&self, name: &str) -> BoardResult<BoardConfig> {
        self.load_config()?
            .boards
            .into_iter()
            .find(|board| board.name == name)
            .ok_or_else(|| BoardError::Config {
                message: format!("No board named '{}' is configured", name),
            })
    }

    /// Get global configuration path
    fn get_global_config_path() -> BoardResult<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| BoardError::Config {
            message: "Could not determine home directory".to_string(),
        })?;

        Ok(home.join(".config").join("replboard").join(CONFIG_FILE))
    }

    /// Find project configuration path by walking up directory tree
    fn find_project_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        let mut path = current_dir.as_path();

        loop {
            let config_path = path.join(CONFIG_DIR).join(CONFIG_FILE);
            if config_path.exists() {
                return Some(config_path);
            }

            path = path.parent()?;
        }
    }

    /// Load configuration from specific path
    pub fn load_config_from_path(&self, path: &Path) -> BoardResult<ReplBoardConfig> {
        let content = fs::read_to_string(path).map_err(|e| BoardError::Config {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        toml::from_str(&content).map_err(|e| BoardError::Config {
            message: format!("Failed to parse config file {}: {}", path.display(), e),
        })
    }

    /// Save configuration to specific path
    pub fn save_config_to_path(&self, path: &Path, config: &ReplBoardConfig) -> BoardResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| BoardError::Config {
                message: format!("Failed to create config directory: {}", e),
            })?;
        }

        let content = toml::to_string_pretty(config).map_err(|e| BoardError::Config {
            message: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, content).map_err(|e| BoardError::Config {
            message: format!("Failed to write config file {}: {}", path.display(), e),
        })
    }

    /// Create default project configuration
    pub fn init_project_config(&self, path: &Path) -> BoardResult<PathBuf> {
        let config_file = path.join(CONFIG_DIR).join(CONFIG_FILE);

        if config_file.exists() {
            return Err(BoardError::Config {
                message: "Project configuration already exists".to_string(),
            });
        }

        let mut example = BoardConfig::new("/dev/ttyACM0");
        example.name = "example_board".to_string();
        example.description = "CircuitPython board on USB CDC".to_string();
        example.connect_wait_secs = 5;

        let default_config = ReplBoardConfig {
            global: GlobalConfig::default(),
            boards: vec![example],
        };

        self.save_config_to_path(&config_file, &default_config)?;

        Ok(config_file)
    }

    /// Get the current project config path (if any)
    pub fn get_project_config_path(&self) -> Option<&PathBuf> {
        self.project_config_path.as_ref()
    }

    /// Get the global config path
    pub fn get_global_config_path_ref(&self) -> &PathBuf {
        &self.global_config_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::ExecMode;
    use tempfile::TempDir;

    fn manager_in(dir: &TempDir) -> ConfigManager {
        ConfigManager::with_paths(
            dir.path().join("global").join(CONFIG_FILE),
            Some(dir.path().join(CONFIG_DIR).join(CONFIG_FILE)),
        )
    }

    #[test]
    fn test_load_default_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = manager_in(&temp_dir).load_config().unwrap();

        assert_eq!(config.global.log_level, "info");
        assert_eq!(config.global.exec_mode, ExecMode::Direct);
        assert!(config.boards.is_empty());
    }

    #[test]
    fn test_init_project_config() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager_in(&temp_dir);

        let config_file = manager.init_project_config(temp_dir.path()).unwrap();
        assert_eq!(config_file, temp_dir.path().join(".replboard").join("config.toml"));

        let content = fs::read_to_string(&config_file).unwrap();
        let config: ReplBoardConfig = toml::from_str(&content).unwrap();
        assert_eq!(config.boards.len(), 1);
        assert_eq!(config.boards[0].baud_rate, 115_200);

        assert!(manager.init_project_config(temp_dir.path()).is_err());
    }

    #[test]
    fn test_project_boards_override_global() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager_in(&temp_dir);

        let mut shared = BoardConfig::new("/dev/ttyACM0");
        shared.name = "feather".to_string();
        let mut other = BoardConfig::new("/dev/ttyACM1");
        other.name = "metro".to_string();
        let global = ReplBoardConfig {
            global: GlobalConfig {
                exec_mode: ExecMode::Staged,
                ..GlobalConfig::default()
            },
            boards: vec![shared.clone(), other],
        };
        manager
            .save_config_to_path(manager.get_global_config_path_ref(), &global)
            .unwrap();

        shared.device = "/dev/ttyACM7".to_string();
        let project = ReplBoardConfig {
            global: GlobalConfig::default(),
            boards: vec![shared],
        };
        manager
            .save_config_to_path(manager.get_project_config_path().unwrap(), &project)
            .unwrap();

        let config = manager.load_config().unwrap();
        assert_eq!(config.global.exec_mode, ExecMode::Staged);
        assert_eq!(config.boards.len(), 2);
        assert_eq!(manager.find_board("feather").unwrap().device, "/dev/ttyACM7");
        assert_eq!(manager.find_board("metro").unwrap().device, "/dev/ttyACM1");
        assert!(matches!(
            manager.find_board("missing"),
            Err(BoardError::Config { .. })
        ));
    }

    #[test]
    fn test_save_splits_global_and_project() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager_in(&temp_dir);

        let mut config = ReplBoardConfig::default();
        config.global.protocol_timeout_ms = 2_000;
        config.boards.push(BoardConfig::new("/dev/ttyUSB0"));
        manager.save_config(&config).unwrap();

        let global = manager
            .load_config_from_path(manager.get_global_config_path_ref())
            .unwrap();
        assert_eq!(global.global.protocol_timeout_ms, 2_000);
        assert!(global.boards.is_empty());

        let loaded = manager.load_config().unwrap();
        assert_eq!(loaded.boards.len(), 1);
        assert_eq!(loaded.boards[0].device, "/dev/ttyUSB0");
    }

    #[test]
    fn test_parse_error_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager_in(&temp_dir);
        let path = temp_dir.path().join("broken.toml");
        fs::write(&path, "[global\nlog_level = ").unwrap();

        assert!(matches!(
            manager.load_config_from_path(&path),
            Err(BoardError::Config { .. })
        ));
    }
}
