//! Configuration validation rules.
//!
//! Every service must carry a name, a parseable cron expression and HTTP
//! options with a resolvable URL. Failures name the offending field so the
//! process can stop at startup with a readable message.

use std::collections::HashSet;

use thiserror::Error;

use crate::config::CacheConfig;
use crate::schedule::{CronSchedule, parse_timezone};

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl CacheConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if a service lacks `name`,
    /// `cron_expression` or `http_options`, and `ConfigError::Invalid` if:
    /// - two services share a name
    /// - a cron expression or timezone does not parse
    /// - the HTTP options do not resolve to a URL
    /// - `index_batch_size` is 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.index_batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "index_batch_size".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if let Some(tz) = &self.timezone {
            parse_timezone(tz).map_err(|reason| ConfigError::Invalid { field: "timezone".into(), reason })?;
        }

        let mut seen = HashSet::new();
        for (i, service) in self.services.iter().enumerate() {
            if service.name.trim().is_empty() {
                return Err(ConfigError::Missing {
                    field: format!("services[{i}].name"),
                    hint: "every service needs a unique name".into(),
                });
            }
            if !seen.insert(service.name.as_str()) {
                return Err(ConfigError::Invalid {
                    field: format!("services[{i}].name"),
                    reason: format!("duplicate service name '{}'", service.name),
                });
            }

            if service.cron_expression.trim().is_empty() {
                return Err(ConfigError::Missing {
                    field: format!("services[{i}].cron_expression"),
                    hint: "e.g. \"0 */10 * * * *\"".into(),
                });
            }
            CronSchedule::parse(&service.cron_expression).map_err(|reason| ConfigError::Invalid {
                field: format!("services[{i}].cron_expression"),
                reason,
            })?;

            let http = service.http_options.as_ref().ok_or_else(|| ConfigError::Missing {
                field: format!("services[{i}].http_options.url"),
                hint: "set http_options.url".into(),
            })?;
            http.resolve_url().map_err(|e| match e {
                ConfigError::Missing { hint, .. } => {
                    ConfigError::Missing { field: format!("services[{i}].http_options.url"), hint }
                }
                ConfigError::Invalid { reason, .. } => {
                    ConfigError::Invalid { field: format!("services[{i}].http_options.url"), reason }
                }
                other => other,
            })?;

            if let Some(tz) = &service.timezone {
                parse_timezone(tz).map_err(|reason| ConfigError::Invalid {
                    field: format!("services[{i}].timezone"),
                    reason,
                })?;
            }
        }

        if self.services.is_empty() {
            tracing::warn!("no services configured; the cache will stay empty");
        }

        Ok(())
    }
}
