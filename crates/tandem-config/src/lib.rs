// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Configuration loading for tandem.

mod schema;

pub use schema::{
    default_config_path, Config, ConfigError, ModelConfig, Protocol, ThinkingConfig,
};
