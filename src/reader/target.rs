/// Radio technology a reader can poll for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModulationType {
	/// ISO/IEC 14443 type A, which covers MIFARE Ultralight and NTAG21x.
	Iso14443a,
	Iso14443b,
	Felica,
	Jewel,

	/// Anything the reader could not classify.
	Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaudRate {
	Kbps106,
	Kbps212,
	Kbps424,
	Kbps847,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Modulation {
	pub kind: ModulationType,
	pub baud: BaudRate,
}

/// A tag found by a poll.
///
/// The handle is only meaningful to the reader that produced it, and only until the tag leaves
/// the field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
	pub modulation: ModulationType,

	/// Unique identifier reported during anticollision, may be empty if the reader did not
	/// provide it.
	pub uid: Vec<u8>,
}

impl Target {
	pub fn new(modulation: ModulationType, uid: impl Into<Vec<u8>>) -> Self {
		Self {
			modulation,
			uid: uid.into(),
		}
	}

	/// Whether this target can hold the NDEF layout read by the scanner.
	pub fn is_supported(&self) -> bool {
		self.modulation == ModulationType::Iso14443a
	}

	/// Lowercase hex of the UID, for logs.
	pub fn uid_hex(&self) -> String {
		hex::encode(&self.uid)
	}
}
