//! Configuration for the allocation engine

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Allocation engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Decimal places kept when money is scaled to solver integers
    /// (2 = cents)
    pub scale: u32,

    /// Requests smaller than this magnitude allocate nothing
    pub tolerance: Decimal,

    /// Upper bound on solver re-invocations per weighted node
    pub max_rebalance_rounds: usize,

    /// Assign mandatory minimums before discretionary flows
    pub assign_minimums: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scale: 2,
            tolerance: Decimal::new(1, 5), // 0.00001
            max_rebalance_rounds: 16,
            assign_minimums: true,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(scale) = std::env::var("ALLOCATION_SCALE") {
            config.scale = scale
                .parse()
                .map_err(|e| crate::Error::Config(format!("ALLOCATION_SCALE: {}", e)))?;
        }

        if let Ok(tolerance) = std::env::var("ALLOCATION_TOLERANCE") {
            config.tolerance = Decimal::from_str(&tolerance)
                .map_err(|e| crate::Error::Config(format!("ALLOCATION_TOLERANCE: {}", e)))?;
        }

        if let Ok(rounds) = std::env::var("ALLOCATION_MAX_REBALANCE_ROUNDS") {
            config.max_rebalance_rounds = rounds.parse().map_err(|e| {
                crate::Error::Config(format!("ALLOCATION_MAX_REBALANCE_ROUNDS: {}", e))
            })?;
        }

        if let Ok(flag) = std::env::var("ALLOCATION_ASSIGN_MINIMUMS") {
            config.assign_minimums = flag
                .parse()
                .map_err(|e| crate::Error::Config(format!("ALLOCATION_ASSIGN_MINIMUMS: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the solver cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        // i64 minor units must still cover realistic balances
        if self.scale > 8 {
            return Err(crate::Error::Config(format!(
                "scale {} exceeds 8 decimal places",
                self.scale
            )));
        }
        if self.tolerance < Decimal::ZERO {
            return Err(crate::Error::Config("tolerance must be non-negative".to_string()));
        }
        if self.max_rebalance_rounds == 0 {
            return Err(crate::Error::Config(
                "max_rebalance_rounds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scale, 2);
        assert!(config.assign_minimums);
    }

    #[test]
    fn test_from_file_partial_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "scale = 4\nassign_minimums = false").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.scale, 4);
        assert!(!config.assign_minimums);
        assert_eq!(config.max_rebalance_rounds, Config::default().max_rebalance_rounds);
    }

    #[test]
    fn test_invalid_scale_rejected() {
        let config = Config {
            scale: 12,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
    }
}
