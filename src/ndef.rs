use bstr::BString;
use deku::{ctx::Endian, no_std_io, prelude::*};
use flagset::{flags, FlagSet};

/// TLV tag marking an NDEF message in Type 2 tag memory.
pub const NDEF_MESSAGE_TLV: u8 = 0x03;

/// Well-known record type of a text record.
pub const TEXT_RECORD_TYPE: u8 = b'T';

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
	/// Memory does not start with an NDEF message TLV.
	#[error("unknown tag format")]
	NotNdef,

	/// The record is not a text record; carries the record type found.
	#[error("record type {0:#04x} is not a text record")]
	NotTextRecord(u8),

	/// A text record always has at least its status byte.
	#[error("record payload is empty")]
	EmptyPayload,

	/// The record claims more payload than the tag memory holds.
	#[error("record payload needs {needed} bytes but only {available} remain")]
	Truncated { needed: usize, available: usize },

	#[error("malformed record header: {0}")]
	Malformed(#[from] DekuError),
}

/// Start of an NDEF message: the TLV envelope and the header of its first record.
#[derive(Debug, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(magic = b"\x03")]
pub struct NdefMessage {
	/// Length of the TLV value. Not checked against the memory size.
	pub length: u8,

	pub header: RecordHeader,
}

#[derive(Debug, Clone, PartialEq, Eq, DekuRead, DekuWrite)]
pub struct RecordHeader {
	#[deku(
		reader = "RecordFlags::deku_reader(deku::reader)",
		writer = "RecordFlags::deku_writer(deku::writer, &self.flags)"
	)]
	pub flags: RecordFlags,

	/// Length of the record type. Only a one-byte type is ever read.
	pub type_length: u8,

	/// Length of the payload, including the text status byte.
	pub payload_length: u8,

	/// Length of the record ID, present only if flagged.
	#[deku(cond = "flags.has_id_length()")]
	pub id_length: Option<u8>,

	/// Record type; `T` for text.
	pub record_type: u8,
}

flags! {
	/// Flags in the high bits of the record header byte.
	pub enum RecordFlag: u8 {
		MessageBegin = 0b1000_0000,
		MessageEnd   = 0b0100_0000,
		Chunked      = 0b0010_0000,
		ShortRecord  = 0b0001_0000,
		IdLength     = 0b0000_1000,
	}
}

/// The record header byte: flags and type name format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordFlags {
	pub flags: FlagSet<RecordFlag>,
	pub type_name_format: TypeNameFormat,
}

impl RecordFlags {
	pub fn new(flags: impl Into<FlagSet<RecordFlag>>, type_name_format: TypeNameFormat) -> Self {
		Self {
			flags: flags.into(),
			type_name_format,
		}
	}

	pub fn has_id_length(&self) -> bool {
		self.flags.contains(RecordFlag::IdLength)
	}

	pub fn bits(&self) -> u8 {
		self.flags.bits() | self.type_name_format as u8
	}

	fn deku_reader<R: no_std_io::Read + no_std_io::Seek>(
		reader: &mut Reader<R>,
	) -> Result<Self, DekuError> {
		let value = u8::from_reader_with_ctx(reader, Endian::Little)?;
		Ok(Self {
			flags: FlagSet::new_truncated(value),
			type_name_format: TypeNameFormat::from_bits(value),
		})
	}

	fn deku_writer<W: std::io::Write + std::io::Seek>(
		writer: &mut Writer<W>,
		field: &Self,
	) -> Result<(), DekuError> {
		field.bits().to_writer(writer, Endian::Little)
	}
}

/// How the record type is to be interpreted. Logged, never checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[rustfmt::skip]
pub enum TypeNameFormat {
	Empty       = 0,
	WellKnown   = 1,
	Mime        = 2,
	AbsoluteUri = 3,
	External    = 4,
	Unknown     = 5,
	Unchanged   = 6,
	Reserved    = 7,
}

impl TypeNameFormat {
	/// Take the format from the low three bits of a header byte.
	pub const fn from_bits(value: u8) -> Self {
		match value & 0b111 {
			0 => Self::Empty,
			1 => Self::WellKnown,
			2 => Self::Mime,
			3 => Self::AbsoluteUri,
			4 => Self::External,
			5 => Self::Unknown,
			6 => Self::Unchanged,
			_ => Self::Reserved,
		}
	}
}

/// A decoded text record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRecord {
	pub header: RecordHeader,

	/// Payload after the status byte: `payload_length - 1` bytes.
	pub text: BString,
}

/// Decode the text record at the start of tag user memory.
///
/// `memory` starts at the first user page. The message must open with an NDEF TLV, and its first
/// record must be a text record whose payload fits in `memory`. Any other content is rejected
/// right away, without looking further.
#[tracing::instrument(level = "trace", skip(memory))]
pub fn decode(memory: &[u8]) -> Result<TextRecord, DecodeError> {
	if memory.first() != Some(&NDEF_MESSAGE_TLV) {
		return Err(DecodeError::NotNdef);
	}

	let ((rest, _), message) = NdefMessage::from_bytes((memory, 0))?;
	let header = message.header;
	tracing::debug!(
		length = message.length,
		format = ?header.flags.type_name_format,
		flags = ?header.flags.flags,
		type_length = header.type_length,
		payload_length = header.payload_length,
		id_length = ?header.id_length,
		record_type = header.record_type,
		"read record header"
	);

	if header.payload_length == 0 {
		return Err(DecodeError::EmptyPayload);
	}

	if header.record_type != TEXT_RECORD_TYPE {
		return Err(DecodeError::NotTextRecord(header.record_type));
	}

	let needed = usize::from(header.payload_length);
	let payload = rest.get(..needed).ok_or(DecodeError::Truncated {
		needed,
		available: rest.len(),
	})?;

	// first payload byte is the status byte (language code length)
	let text = BString::from(&payload[1..]);
	tracing::trace!(?text, "read text payload");

	Ok(TextRecord { header, text })
}
