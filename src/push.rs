//! Push delivery: URL signing, endpoint-side verification, and the HTTP client.

pub mod client;
pub mod signing;

// crates.io
use serde::Deserialize;
use serde_json::Value;

/// Payload of one push.
///
/// Structured payloads go out as a JSON body; text and queued bytes go out raw.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(from = "Value")]
pub enum PushBody {
	/// JSON document sent with `Content-Type: application/json`.
	Json(Value),
	/// Opaque bytes sent as-is.
	Raw(Vec<u8>),
}
impl PushBody {
	/// Bytes persisted when the push has to be queued.
	pub fn to_bytes(&self) -> Vec<u8> {
		match self {
			Self::Json(value) => value.to_string().into_bytes(),
			Self::Raw(bytes) => bytes.clone(),
		}
	}
}
impl From<Value> for PushBody {
	fn from(value: Value) -> Self {
		match value {
			Value::String(text) => Self::Raw(text.into_bytes()),
			other => Self::Json(other),
		}
	}
}
impl From<Vec<u8>> for PushBody {
	fn from(bytes: Vec<u8>) -> Self {
		Self::Raw(bytes)
	}
}
impl From<&str> for PushBody {
	fn from(text: &str) -> Self {
		Self::Raw(text.as_bytes().to_vec())
	}
}
