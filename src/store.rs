use std::ops::Range;

use crate::{
	config::{FIRST_DATA_PAGE, PAGE_SIZE},
	ndef::DecodeError,
	reader::{TagReader, Target},
	validate::ValidationError,
};

/// Why a detected tag produced no presence event.
///
/// None of these stop the scanner: the tag is skipped and its removal is still reported.
#[derive(Debug, thiserror::Error)]
pub enum TagError {
	#[error("could not connect to tag: {0}")]
	ConnectFailed(#[source] std::io::Error),

	#[error("could not read tag page {page}: {source}")]
	ReadFailed {
		page: u8,
		#[source]
		source: std::io::Error,
	},

	#[error(transparent)]
	Decode(#[from] DecodeError),

	#[error(transparent)]
	Validation(#[from] ValidationError),
}

/// User memory of one tag, from [`FIRST_DATA_PAGE`] up to a page limit.
///
/// Built by [`RawTagStore::read`], which either reads every page or fails; a partially read store
/// is never handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTagStore {
	first_page: u8,
	bytes: Box<[u8]>,
}

impl RawTagStore {
	/// Read pages `FIRST_DATA_PAGE..page_limit` of `target`.
	#[tracing::instrument(level = "trace", skip(reader, target), fields(uid = %target.uid_hex()))]
	pub async fn read<R: TagReader>(
		reader: &mut R,
		target: &Target,
		page_limit: u8,
	) -> Result<Self, TagError> {
		let pages = FIRST_DATA_PAGE..page_limit.max(FIRST_DATA_PAGE);
		let mut bytes = Vec::with_capacity(pages.len() * PAGE_SIZE);
		for page in pages {
			let data = reader
				.read_page(target, page)
				.await
				.map_err(|source| TagError::ReadFailed { page, source })?;
			tracing::trace!(?page, data = %hex::encode(data), "read page");
			bytes.extend_from_slice(&data);
		}

		Ok(Self {
			first_page: FIRST_DATA_PAGE,
			bytes: bytes.into_boxed_slice(),
		})
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.bytes
	}

	/// Tag pages held in this store.
	pub fn pages(&self) -> Range<u8> {
		let count = u8::try_from(self.bytes.len() / PAGE_SIZE).unwrap_or(u8::MAX);
		self.first_page..self.first_page.saturating_add(count)
	}

	/// Bytes of one tag page, by its absolute index.
	pub fn page(&self, page: u8) -> Option<&[u8]> {
		let index = usize::from(page.checked_sub(self.first_page)?);
		self.bytes.get(index * PAGE_SIZE..(index + 1) * PAGE_SIZE)
	}
}
