//! Configuration for the passivation engine.
//!
//! [`Settings`] is plain data: construct it directly, mutate the fields of a
//! [`Default`] value, or deserialize it from any `serde` source. Parsing a
//! configuration file is the surrounding system's responsibility; validation
//! happens when a [`PassivationManager`] (or [`ShardHost`]) is constructed
//! and is fatal there.
//!
//! [`PassivationManager`]: crate::passivation::PassivationManager
//! [`ShardHost`]: crate::ShardHost

use std::error::Error as StdError;
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants;
use crate::internal::prelude::*;
use crate::passivation::Strategy;

/// Settings for a [`ShardHost`].
///
/// # Examples
///
/// Bound the node to 1000 live entities, spread across its hosted shards:
///
/// ```rust
/// use shardhost::settings::Settings;
///
/// let mut settings = Settings::least_recently_used(1000);
/// settings.tuning.buffer_size = 64;
/// ```
///
/// [`ShardHost`]: crate::ShardHost
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// The passivation strategy and its parameters.
    pub passivation: PassivationSettings,
    /// Tuning knobs for the stop handshake.
    pub tuning: TuningSettings,
    /// Whether an out-of-protocol handshake observation (a stop
    /// acknowledgement for an entity that was never asked to stop) aborts
    /// the shard controller instead of resynchronizing with a warning.
    ///
    /// Defaults to `false`.
    pub strict: bool,
}

impl Settings {
    /// Settings with passivation disabled: entities stay active until their
    /// shard is deactivated.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Settings that passivate entities once they have received no messages
    /// for `timeout`.
    #[must_use]
    pub fn idle(timeout: Duration) -> Self {
        Self {
            passivation: PassivationSettings {
                strategy: StrategyKind::Idle,
                idle: Some(IdleSettings {
                    timeout,
                }),
                ..PassivationSettings::default()
            },
            ..Self::default()
        }
    }

    /// Settings that bound the node to `limit` active entities, evicting the
    /// least recently used entity of a shard once its share of the budget is
    /// exceeded.
    #[must_use]
    pub fn least_recently_used(limit: usize) -> Self {
        Self {
            passivation: PassivationSettings {
                strategy: StrategyKind::LeastRecentlyUsed,
                least_recently_used: Some(LruSettings {
                    limit,
                }),
                ..PassivationSettings::default()
            },
            ..Self::default()
        }
    }

    /// Validates the settings and resolves the strategy variant.
    pub(crate) fn strategy(&self) -> StdResult<Strategy, SettingsError> {
        if self.tuning.buffer_size == 0 {
            return Err(SettingsError::NonPositiveBufferSize);
        }

        let strategy = match self.passivation.strategy {
            StrategyKind::None => Strategy::Disabled,
            StrategyKind::Idle => {
                let idle = self
                    .passivation
                    .idle
                    .as_ref()
                    .ok_or(SettingsError::MissingIdleTimeout)?;
                if idle.timeout.is_zero() {
                    return Err(SettingsError::NonPositiveIdleTimeout);
                }

                Strategy::Idle {
                    timeout: idle.timeout,
                }
            },
            StrategyKind::LeastRecentlyUsed => {
                let lru = self
                    .passivation
                    .least_recently_used
                    .as_ref()
                    .ok_or(SettingsError::MissingLimit)?;
                let limit =
                    NonZeroUsize::new(lru.limit).ok_or(SettingsError::NonPositiveLimit)?;

                Strategy::LeastRecentlyUsed {
                    limit,
                }
            },
        };

        if self.passivation.passivate_idle_entities_after.is_some() {
            warn!(
                "Both an explicit passivation strategy and the legacy \
                 `passivate-idle-entities-after` setting are present; the explicit strategy \
                 takes precedence"
            );
        }

        Ok(strategy)
    }
}

/// Selection of the passivation strategy for a node.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PassivationSettings {
    /// The strategy variant. Defaults to [`StrategyKind::None`].
    pub strategy: StrategyKind,
    /// Parameters for the `idle` strategy; required when it is selected.
    pub idle: Option<IdleSettings>,
    /// Parameters for the `least-recently-used` strategy; required when it
    /// is selected.
    #[serde(rename = "least-recently-used")]
    pub least_recently_used: Option<LruSettings>,
    /// The legacy idle setting kept for configurations written against older
    /// releases. When an explicit `strategy` is configured this field is
    /// ignored with a warning.
    #[serde(rename = "passivate-idle-entities-after")]
    pub passivate_idle_entities_after: Option<Duration>,
}

/// Parameters for the idle strategy.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct IdleSettings {
    /// How long an entity may go without receiving a message before it is
    /// passivated. Must be positive.
    pub timeout: Duration,
}

/// Parameters for the least-recently-used strategy.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct LruSettings {
    /// The total active-entity budget across all shards hosted on this
    /// node. Each shard's cap is `max(1, limit / hosted_shards)`. Must be
    /// positive.
    pub limit: usize,
}

/// Tuning knobs for the stop handshake.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TuningSettings {
    /// The per-entity message buffer cap while a worker is passivating.
    /// Overflow drops the oldest buffered message. Must be positive.
    ///
    /// Defaults to [`DEFAULT_BUFFER_SIZE`].
    ///
    /// [`DEFAULT_BUFFER_SIZE`]: crate::constants::DEFAULT_BUFFER_SIZE
    pub buffer_size: usize,
    /// How long a worker may take to acknowledge a stop signal before it is
    /// force-terminated.
    ///
    /// Defaults to [`DEFAULT_HAND_OFF_TIMEOUT`].
    ///
    /// [`DEFAULT_HAND_OFF_TIMEOUT`]: crate::constants::DEFAULT_HAND_OFF_TIMEOUT
    pub hand_off_timeout: Duration,
}

impl Default for TuningSettings {
    fn default() -> Self {
        Self {
            buffer_size: constants::DEFAULT_BUFFER_SIZE,
            hand_off_timeout: constants::DEFAULT_HAND_OFF_TIMEOUT,
        }
    }
}

/// The passivation strategy variants recognized in configuration.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// No automatic passivation.
    #[default]
    None,
    /// Passivate entities that have been idle for a configured timeout.
    Idle,
    /// Bound the number of active entities, evicting least-recently-used.
    LeastRecentlyUsed,
}

impl StrategyKind {
    /// The configuration name of the variant.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Idle => "idle",
            Self::LeastRecentlyUsed => "least-recently-used",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = SettingsError;

    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "idle" => Ok(Self::Idle),
            "least-recently-used" => Ok(Self::LeastRecentlyUsed),
            other => Err(SettingsError::UnknownStrategy(other.to_owned())),
        }
    }
}

/// An error describing why a [`Settings`] value is invalid.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum SettingsError {
    /// `passivation.strategy` named a strategy this library does not know.
    UnknownStrategy(String),
    /// The `idle` strategy was selected without `passivation.idle`.
    MissingIdleTimeout,
    /// `passivation.idle.timeout` was zero.
    NonPositiveIdleTimeout,
    /// The `least-recently-used` strategy was selected without
    /// `passivation.least-recently-used`.
    MissingLimit,
    /// `passivation.least-recently-used.limit` was zero.
    NonPositiveLimit,
    /// `tuning.bufferSize` was zero.
    NonPositiveBufferSize,
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownStrategy(name) => write!(f, "unknown passivation strategy `{name}`"),
            Self::MissingIdleTimeout => {
                f.write_str("the idle strategy requires `passivation.idle.timeout`")
            },
            Self::NonPositiveIdleTimeout => {
                f.write_str("`passivation.idle.timeout` must be positive")
            },
            Self::MissingLimit => f.write_str(
                "the least-recently-used strategy requires \
                 `passivation.least-recently-used.limit`",
            ),
            Self::NonPositiveLimit => {
                f.write_str("`passivation.least-recently-used.limit` must be positive")
            },
            Self::NonPositiveBufferSize => f.write_str("`tuning.bufferSize` must be positive"),
        }
    }
}

impl StdError for SettingsError {}
