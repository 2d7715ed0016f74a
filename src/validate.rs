use bstr::{BStr, BString, ByteSlice as _};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
	#[error("record is not a {prefix} identifier: {text}")]
	PrefixMismatch { prefix: BString, text: BString },
}

/// A text record confirmed to carry an identifier.
///
/// Holds the whole text, prefix included, which is what gets published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPayload {
	text: BString,
	prefix_len: usize,
}

impl ValidatedPayload {
	/// The full text, published verbatim.
	pub fn as_bytes(&self) -> &[u8] {
		self.text.as_slice()
	}

	/// The identifier with the prefix stripped.
	pub fn identifier(&self) -> &BStr {
		self.text[self.prefix_len..].as_bstr()
	}

	pub fn into_bytes(self) -> Vec<u8> {
		self.text.into()
	}
}

/// Check that `text` starts with `prefix`, byte for byte.
pub fn validate(text: impl Into<BString>, prefix: &[u8]) -> Result<ValidatedPayload, ValidationError> {
	let text = text.into();
	if !text.starts_with(prefix) {
		return Err(ValidationError::PrefixMismatch {
			prefix: prefix.into(),
			text,
		});
	}

	Ok(ValidatedPayload {
		text,
		prefix_len: prefix.len(),
	})
}
