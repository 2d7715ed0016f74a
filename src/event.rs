use crate::{config::REMOVED_PAYLOAD, validate::ValidatedPayload};

/// A message for the bus about one tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagEvent {
	/// A tag carrying a valid identifier arrived.
	Present { topic: String, payload: Vec<u8> },

	/// The tag left the reader, whether or not it was valid.
	Absent { topic: String },
}

impl TagEvent {
	pub fn present(topic: impl ToString, payload: ValidatedPayload) -> Self {
		Self::Present {
			topic: topic.to_string(),
			payload: payload.into_bytes(),
		}
	}

	pub fn absent(topic: impl ToString) -> Self {
		Self::Absent {
			topic: topic.to_string(),
		}
	}

	pub fn topic(&self) -> &str {
		match self {
			Self::Present { topic, .. } | Self::Absent { topic } => topic,
		}
	}

	/// Bytes sent on the wire: the identifier text, or `removed`.
	pub fn payload(&self) -> &[u8] {
		match self {
			Self::Present { payload, .. } => payload,
			Self::Absent { .. } => REMOVED_PAYLOAD,
		}
	}
}
