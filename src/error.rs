use thiserror::Error;

/// Errors raised by cache providers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
	/// A value of a different type is stored under this key.
	///
	/// Two callers are sharing a key space with different value types. This is fatal for the
	/// call and is never retried.
	#[error("cached value for `{region}/{key}` is a `{found}`, expected `{expected}`")]
	TypeMismatch {
		region: String,
		key: String,
		expected: &'static str,
		found: &'static str,
	},

	/// A configuration value was rejected.
	#[error("invalid configuration for `{key}`: {reason}")]
	InvalidConfig { key: &'static str, reason: String },
}

impl CacheError {
	pub(crate) fn invalid_config(key: &'static str, reason: impl Into<String>) -> Self {
		Self::InvalidConfig {
			key,
			reason: reason.into(),
		}
	}
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
