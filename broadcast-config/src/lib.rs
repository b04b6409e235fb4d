//! Configuration management for broadcast components

use config::{builder::DefaultState, Config, ConfigBuilder, Environment};
use serde::Deserialize;
use thiserror::Error;

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A source could not be read or deserialized
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// Values were read but are not usable
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Remote endpoint the stream session connects to
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
}

/// Timing of the throughput sampling loop
#[derive(Debug, Clone, Deserialize)]
pub struct ThroughputSettings {
    /// Time between measurements (ms)
    pub measurement_delay_ms: u64,
    /// Wait after a bitrate decrease before increasing again (ms)
    pub settlement_delay_ms: u64,
    /// Wait between two increase recommendations (ms)
    pub increase_delta_ms: u64,
}

impl Default for ThroughputSettings {
    fn default() -> Self {
        ThroughputSettings {
            measurement_delay_ms: 2_000,
            settlement_delay_ms: 30_000,
            increase_delta_ms: 10_000,
        }
    }
}

/// Bounds for the adaptive bitrate policy
#[derive(Debug, Clone, Deserialize)]
pub struct BitrateSettings {
    /// Highest video bitrate the policy may choose (bps)
    pub ceiling_bps: u32,
    /// Lowest video bitrate the policy may choose (bps)
    pub min_video_bps: u32,
    /// Audio channels, selects the stereo or mono audio tier
    pub audio_channels: u32,
    /// Clamp to the predicted bandwidth when it drops below the current rate
    pub clamp_to_bandwidth: bool,
}

impl Default for BitrateSettings {
    fn default() -> Self {
        BitrateSettings {
            ceiling_bps: 1_000_000,
            min_video_bps: 32_000,
            audio_channels: 2,
            clamp_to_bandwidth: false,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub throughput: ThroughputSettings,
    #[serde(default)]
    pub bitrate: BitrateSettings,
    pub log_level: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// Variables use the `BROADCAST_` prefix and `__` between nested keys,
    /// e.g. `BROADCAST_ENDPOINT__PORT=1935`.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let builder = Self::defaults()?.add_source(
            Environment::with_prefix("BROADCAST")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        Self::load(builder)
    }

    /// Built-in defaults, the lowest-priority layer
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let throughput = ThroughputSettings::default();
        let bitrate = BitrateSettings::default();

        Ok(Config::builder()
            .set_default("endpoint.host", "127.0.0.1")?
            .set_default("endpoint.port", 1935_i64)?
            .set_default("throughput.measurement_delay_ms", throughput.measurement_delay_ms as i64)?
            .set_default("throughput.settlement_delay_ms", throughput.settlement_delay_ms as i64)?
            .set_default("throughput.increase_delta_ms", throughput.increase_delta_ms as i64)?
            .set_default("bitrate.ceiling_bps", bitrate.ceiling_bps as i64)?
            .set_default("bitrate.min_video_bps", bitrate.min_video_bps as i64)?
            .set_default("bitrate.audio_channels", bitrate.audio_channels as i64)?
            .set_default("bitrate.clamp_to_bandwidth", bitrate.clamp_to_bandwidth)?
            .set_default("log_level", "info")?)
    }

    /// Build, deserialize and validate
    pub fn load(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.port == 0 {
            return Err(ConfigError::Invalid("endpoint.port must be non-zero".to_string()));
        }
        if self.throughput.measurement_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "throughput.measurement_delay_ms must be non-zero".to_string(),
            ));
        }
        if self.bitrate.ceiling_bps < self.bitrate.min_video_bps {
            return Err(ConfigError::Invalid(format!(
                "bitrate.ceiling_bps ({}) is below bitrate.min_video_bps ({})",
                self.bitrate.ceiling_bps, self.bitrate.min_video_bps
            )));
        }
        Ok(())
    }

    /// `host:port` of the remote endpoint
    pub fn endpoint_addr(&self) -> String {
        format!("{}:{}", self.endpoint.host, self.endpoint.port)
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}
