// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Start-up configuration for the lock layer and the total-order core.
//!
//! Read once when the cache starts; nothing here is reconfigured at runtime.

use std::time::Duration;

/// Errors raised when a configuration is inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("concurrency level must be greater than zero")]
    ZeroConcurrencyLevel,

    #[error("validation pool size must be greater than zero")]
    ZeroPoolSize,

    #[error("no tokio runtime available to drive validation tasks")]
    NoRuntime,
}

/// Configuration of the per-key lock container.
#[derive(Debug, Clone)]
pub struct LockingConfig {
    /// Stripe count for striped containers, initial table capacity otherwise.
    pub concurrency_level: usize,
    /// How long an acquisition may wait before giving up.
    pub lock_acquisition_timeout: Duration,
    /// Share a fixed number of locks among all keys instead of one lock per key.
    pub use_lock_striping: bool,
    /// Tag locks with the owning transaction and allow reentrant acquisition.
    pub owner_aware: bool,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            concurrency_level: 32,
            lock_acquisition_timeout: Duration::from_secs(10),
            use_lock_striping: false,
            owner_aware: true,
        }
    }
}

impl LockingConfig {
    pub fn with_concurrency_level(mut self, level: usize) -> Self {
        self.concurrency_level = level;
        self
    }

    pub fn with_lock_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.lock_acquisition_timeout = timeout;
        self
    }

    pub fn with_lock_striping(mut self, striping: bool) -> Self {
        self.use_lock_striping = striping;
        self
    }

    pub fn with_owner_aware(mut self, owner_aware: bool) -> Self {
        self.owner_aware = owner_aware;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_level == 0 {
            return Err(ConfigError::ZeroConcurrencyLevel);
        }
        Ok(())
    }
}

/// Configuration of the total-order validation pipeline.
#[derive(Debug, Clone)]
pub struct TotalOrderConfig {
    /// Maximum number of validations running at once.
    pub validation_pool_size: usize,
    /// Validate non-conflicting transactions in parallel. When false the
    /// pool runs a single validation at a time.
    pub multi_thread_validation: bool,
    /// How long a commit or rollback waits for an in-progress prepare.
    pub prepare_wait_timeout: Duration,
}

impl Default for TotalOrderConfig {
    fn default() -> Self {
        Self {
            validation_pool_size: 4,
            multi_thread_validation: true,
            prepare_wait_timeout: Duration::from_secs(15),
        }
    }
}

impl TotalOrderConfig {
    pub fn with_validation_pool_size(mut self, size: usize) -> Self {
        self.validation_pool_size = size;
        self
    }

    pub fn with_multi_thread_validation(mut self, enabled: bool) -> Self {
        self.multi_thread_validation = enabled;
        self
    }

    pub fn with_prepare_wait_timeout(mut self, timeout: Duration) -> Self {
        self.prepare_wait_timeout = timeout;
        self
    }

    /// Number of validations allowed to run concurrently.
    pub fn effective_pool_size(&self) -> usize {
        if self.multi_thread_validation {
            self.validation_pool_size
        } else {
            1
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.validation_pool_size == 0 {
            return Err(ConfigError::ZeroPoolSize);
        }
        Ok(())
    }
}

/// Combined configuration.
#[derive(Debug, Clone, Default)]
pub struct GridConfig {
    pub locking: LockingConfig,
    pub total_order: TotalOrderConfig,
}

impl GridConfig {
    pub fn with_locking(mut self, locking: LockingConfig) -> Self {
        self.locking = locking;
        self
    }

    pub fn with_total_order(mut self, total_order: TotalOrderConfig) -> Self {
        self.total_order = total_order;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.locking.validate()?;
        self.total_order.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(GridConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = GridConfig::default()
            .with_locking(LockingConfig::default().with_concurrency_level(0));
        assert_eq!(config.validate(), Err(ConfigError::ZeroConcurrencyLevel));
    }

    #[test]
    fn test_zero_pool_rejected() {
        let config = TotalOrderConfig::default().with_validation_pool_size(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroPoolSize));
    }

    #[test]
    fn test_single_thread_validation_caps_pool() {
        let config = TotalOrderConfig::default()
            .with_validation_pool_size(16)
            .with_multi_thread_validation(false);
        assert_eq!(config.effective_pool_size(), 1);
    }
}
