// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Tunables for the task loop.

/// How many times a failed turn is retried before the task aborts.
pub const MAX_FAILED_TURN_RETRIES: u32 = 3;

/// First retry delay; doubles per attempt up to [`MAX_RETRY_DELAY_S`].
pub const INITIAL_RETRY_DELAY_S: f64 = 1.0;

pub const MAX_RETRY_DELAY_S: f64 = 32.0;

/// Turns without a `TodoWrite` before the staleness reminder fires.
pub const TODO_STALE_TURNS: u32 = 10;

/// Compute the exponential backoff delay for the given 1-based attempt.
pub fn retry_delay_seconds(attempt: u32) -> f64 {
    let capped = attempt.max(1);
    let delay = INITIAL_RETRY_DELAY_S * 2f64.powi(capped as i32 - 1);
    delay.min(MAX_RETRY_DELAY_S)
}
