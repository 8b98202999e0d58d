use crate::error::{Error, Result};
use crate::executor::PanicStrategy;

/// Compiler flags applied to every program build.
pub const BUILD_OPTIONS: &str = "-D BLOCK_SIZE=2";

const PLATFORM_ENV: &str = "NDQUEUE_PLATFORM";
const DEVICE_ENV: &str = "NDQUEUE_DEVICE";

#[derive(Debug, Clone)]
pub struct Config {
    /// Case-insensitive substring of the platform name. `None` picks the first platform.
    pub platform_name: Option<String>,
    /// Case-insensitive substring of the device name. `None` picks the first device.
    pub device_name: Option<String>,
    pub thread_name_prefix: String,
    pub stack_size: Option<usize>,
    /// What the device thread does when a kernel body panics.
    pub panic_strategy: PanicStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            platform_name: None,
            device_name: None,
            thread_name_prefix: "ndqueue-device".to_string(),
            stack_size: Some(2 * 1024 * 1024),
            panic_strategy: PanicStrategy::default(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Default config with platform/device names taken from
    /// `NDQUEUE_PLATFORM` and `NDQUEUE_DEVICE` when set.
    pub fn from_env() -> Self {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            platform_name: non_empty(PLATFORM_ENV),
            device_name: non_empty(DEVICE_ENV),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.thread_name_prefix.is_empty() {
            return Err(Error::config("thread_name_prefix must not be empty"));
        }

        if let Some(size) = self.stack_size {
            if size < 64 * 1024 {
                return Err(Error::config("stack_size too small (min 64 KiB)"));
            }
        }

        if matches!(&self.platform_name, Some(name) if name.trim().is_empty()) {
            return Err(Error::config("platform_name must not be blank"));
        }

        if matches!(&self.device_name, Some(name) if name.trim().is_empty()) {
            return Err(Error::config("device_name must not be blank"));
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn platform_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.platform_name = Some(name.into());
        self
    }

    pub fn device_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.device_name = Some(name.into());
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn panic_strategy(mut self, strategy: PanicStrategy) -> Self {
        self.config.panic_strategy = strategy;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = Config::builder()
            .platform_name("host")
            .device_name("cpu")
            .thread_name_prefix("gpu-q")
            .stack_size(1024 * 1024)
            .panic_strategy(PanicStrategy::Isolate)
            .build()
            .unwrap();

        assert_eq!(config.platform_name.as_deref(), Some("host"));
        assert_eq!(config.device_name.as_deref(), Some("cpu"));
        assert_eq!(config.thread_name_prefix, "gpu-q");
        assert_eq!(config.stack_size, Some(1024 * 1024));
        assert_eq!(config.panic_strategy, PanicStrategy::Isolate);
    }

    #[test]
    fn test_rejects_tiny_stack() {
        assert!(Config::builder().stack_size(1024).build().is_err());
    }

    #[test]
    fn test_rejects_blank_names() {
        assert!(Config::builder().device_name("  ").build().is_err());
        assert!(Config::builder().platform_name("").build().is_err());
        assert!(Config::builder().thread_name_prefix("").build().is_err());
    }
}
