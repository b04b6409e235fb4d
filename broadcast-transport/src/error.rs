//! Error types for the broadcast transport core
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use thiserror::Error;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors that can occur in the transport core
#[derive(Error, Debug)]
pub enum TransportError {
    /// CRC width or polynomial out of range
    #[error("Invalid CRC parameters: {bits} bits, polynomial {polynomial:#x}")]
    InvalidCrcParameters { bits: u32, polynomial: u32 },

    /// Input ended before a complete value could be decoded
    #[error("Truncated input: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// Unexpected type marker in a typed value
    #[error("Invalid type marker: {0:#04x}")]
    InvalidMarker(u8),

    /// String payload is not valid UTF-8
    #[error("Invalid UTF-8 in string payload")]
    InvalidUtf8,

    /// Worker thread could not be started
    #[error("Thread spawn failed: {0}")]
    ThreadSpawn(String),

    /// Network error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::NetworkError(err.to_string())
    }
}

impl From<broadcast_config::ConfigError> for TransportError {
    fn from(err: broadcast_config::ConfigError) -> Self {
        TransportError::ConfigError(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for TransportError {
    fn from(_: std::string::FromUtf8Error) -> Self {
        TransportError::InvalidUtf8
    }
}
