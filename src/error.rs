//! Crate-wide error types and `Result` alias.

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the push relay crate.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error(transparent)]
	Redis(#[from] redis::RedisError),
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error("Customer '{customer}' has no readable info record.")]
	DaoUnavailable { customer: String },
	#[error("Failed to enqueue task for customer '{customer}': {source}")]
	Enqueue {
		customer: String,
		#[source]
		source: Box<Error>,
	},
	#[error("Target key {key} is busy.")]
	KeyBusy { key: String },
	#[error("Malformed push task: {0}")]
	MalformedTask(String),
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Push to {url} rejected with {status}: {}", .msg.as_deref().unwrap_or("no message"))]
	PushStatus { status: http::StatusCode, url: url::Url, msg: Option<String> },
	#[error("Push to {url} failed: {source}")]
	PushTransport {
		url: url::Url,
		#[source]
		source: reqwest::Error,
	},
	#[error("Store error: {0}")]
	Store(String),
	#[error("Transient store failure during {op}: {reason}")]
	TransientStore { op: &'static str, reason: String },
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
impl Error {
	/// Whether the error came from a delivery attempt against a customer endpoint.
	pub fn is_push_failure(&self) -> bool {
		matches!(self, Self::PushStatus { .. } | Self::PushTransport { .. })
	}

	/// Whether the error is a store failure worth one reconnect-and-retry.
	pub fn is_transient_store(&self) -> bool {
		matches!(self, Self::TransientStore { .. })
	}

	/// Short, stable label for logs and metrics.
	pub fn kind(&self) -> &'static str {
		match self {
			Self::Redis(_) | Self::Store(_) | Self::KeyBusy { .. } => "store",
			Self::Io(_) => "io",
			Self::TransientStore { .. } => "transient_store",
			Self::Reqwest(_) | Self::PushStatus { .. } | Self::PushTransport { .. } => "push",
			Self::Serde(_) | Self::Url(_) | Self::MalformedTask(_) => "malformed",
			Self::DaoUnavailable { .. } => "dao_unavailable",
			Self::Enqueue { .. } => "enqueue",
			Self::Metrics(_) => "metrics",
			Self::Validation { .. } => "validation",
		}
	}
}
