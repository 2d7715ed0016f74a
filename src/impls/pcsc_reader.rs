use std::{ffi::CString, future::Future, io, time::Duration};

use pcsc::{Card, Context, Protocols, ReaderState, Scope, ShareMode, State};

use crate::{
	config::POLL_PERIOD_UNIT,
	reader::{Modulation, ModulationType, TagReader, Target},
};

/// ATR prefix of a contactless storage card, as defined by PC/SC part 3.
const STORAGE_CARD_ATR: [u8; 8] = [0x80, 0x4f, 0x0c, 0xa0, 0x00, 0x00, 0x03, 0x06];

const GET_UID: [u8; 5] = [0xff, 0xca, 0x00, 0x00, 0x00];

/// A contactless reader reached through the PC/SC daemon.
///
/// Polling waits for a card in a blocking task so that it can be abandoned; [`abort`] cancels
/// that wait on the daemon side.
///
/// [`abort`]: TagReader::abort
pub struct PcscReader {
	context: Context,
	name: CString,
	card: Option<Card>,
}

impl std::fmt::Debug for PcscReader {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PcscReader")
			.field("name", &self.name)
			.field("connected", &self.card.is_some())
			.finish()
	}
}

impl PcscReader {
	/// Open the reader with this PC/SC name.
	pub fn open(name: &str) -> io::Result<Self> {
		let context = Context::establish(Scope::User).map_err(pcsc_error)?;
		let name = CString::new(name).map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

		let readers = context.list_readers_owned().map_err(pcsc_error)?;
		if !readers.iter().any(|reader| *reader == name) {
			let available: Vec<_> = readers.iter().map(|r| r.to_string_lossy()).collect();
			return Err(io::Error::new(
				io::ErrorKind::NotFound,
				format!("no reader named {name:?}, available: {available:?}"),
			));
		}

		Ok(Self {
			context,
			name,
			card: None,
		})
	}

	fn card(&self) -> io::Result<&Card> {
		self.card
			.as_ref()
			.ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no tag connected"))
	}

	fn transmit(&self, apdu: &[u8]) -> io::Result<Vec<u8>> {
		let mut buf = [0; 258];
		let response = self.card()?.transmit(apdu, &mut buf).map_err(pcsc_error)?;
		match response {
			[data @ .., 0x90, 0x00] => Ok(data.to_vec()),
			[.., sw1, sw2] => Err(io::Error::other(format!(
				"reader answered {sw1:02x}{sw2:02x}"
			))),
			_ => Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
		}
	}
}

impl TagReader for PcscReader {
	fn poll(
		&mut self,
		modulations: &[Modulation],
		attempts: u8,
		period: u8,
	) -> impl Future<Output = io::Result<Option<Target>>> + Send {
		let timeout = POLL_PERIOD_UNIT
			* u32::from(attempts)
			* u32::from(period)
			* u32::try_from(modulations.len()).unwrap_or(u32::MAX);
		let context = self.context.clone();
		let name = self.name.clone();

		async move {
			self.card = None;
			let atr = tokio::task::spawn_blocking(move || wait_for_card(&context, name, timeout))
				.await
				.map_err(io::Error::other)??;
			let Some(atr) = atr else {
				return Ok(None);
			};

			let card = match self
				.context
				.connect(&self.name, ShareMode::Shared, Protocols::ANY)
			{
				Ok(card) => card,
				Err(err) if is_card_error(&err) => {
					tracing::debug!(%err, "card did not answer, ignoring it");
					return Ok(None);
				}
				Err(err) => return Err(pcsc_error(err)),
			};
			self.card = Some(card);

			let uid = self.transmit(&GET_UID).unwrap_or_else(|err| {
				tracing::debug!(%err, "reader did not report a uid");
				Vec::new()
			});
			tracing::trace!(atr = %hex::encode(&atr), "card atr");

			Ok(Some(Target::new(modulation_from_atr(&atr), uid)))
		}
	}

	fn read_page(
		&mut self,
		_target: &Target,
		page: u8,
	) -> impl Future<Output = io::Result<[u8; 4]>> + Send {
		async move {
			let data = self.transmit(&[0xff, 0xb0, 0x00, page, 0x04])?;
			data.get(..4)
				.and_then(|bytes| <[u8; 4]>::try_from(bytes).ok())
				.ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))
		}
	}

	fn is_present(&mut self, _target: &Target) -> impl Future<Output = io::Result<bool>> + Send {
		async move {
			let mut states = [ReaderState::new(self.name.clone(), State::PRESENT)];
			let present = match self.context.get_status_change(Some(Duration::ZERO), &mut states) {
				Err(pcsc::Error::Timeout) => true,
				Ok(()) => states[0].event_state().contains(State::PRESENT),
				Err(err) => return Err(pcsc_error(err)),
			};

			if !present {
				self.card = None;
			}
			Ok(present)
		}
	}

	fn abort(&mut self) -> impl Future<Output = ()> + Send {
		async move {
			if let Err(err) = self.context.cancel() {
				tracing::debug!(%err, "nothing to cancel");
			}
		}
	}

	fn close(&mut self) -> impl Future<Output = ()> + Send {
		async move {
			self.card = None;
		}
	}
}

/// Block until a card is in the field, returning its ATR, or `None` if the timeout passes.
fn wait_for_card(context: &Context, name: CString, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
	let mut states = [ReaderState::new(name, State::UNAWARE)];
	context
		.get_status_change(Some(Duration::ZERO), &mut states)
		.or_else(|err| match err {
			pcsc::Error::Timeout => Ok(()),
			err => Err(err),
		})
		.map_err(pcsc_error)?;

	if !states[0].event_state().contains(State::PRESENT) {
		states[0].sync_current_state();
		match context.get_status_change(Some(timeout), &mut states) {
			Ok(()) => {}
			Err(pcsc::Error::Timeout) => return Ok(None),
			Err(err) => return Err(pcsc_error(err)),
		}
	}

	let state = states[0].event_state();
	if state.contains(State::PRESENT) && !state.contains(State::MUTE) {
		Ok(Some(states[0].atr().to_vec()))
	} else {
		Ok(None)
	}
}

/// Work out the radio technology from the standard byte of a storage card ATR.
fn modulation_from_atr(atr: &[u8]) -> ModulationType {
	match atr.get(4..13) {
		Some([prefix @ .., standard]) if *prefix == STORAGE_CARD_ATR => match *standard {
			0x01..=0x03 => ModulationType::Iso14443a,
			0x05..=0x07 => ModulationType::Iso14443b,
			0x11 => ModulationType::Felica,
			_ => ModulationType::Other,
		},
		_ => ModulationType::Other,
	}
}

/// Errors caused by the card in the field or the radio link to it, not by the reader.
fn is_card_error(err: &pcsc::Error) -> bool {
	matches!(
		err,
		pcsc::Error::NoSmartcard
			| pcsc::Error::RemovedCard
			| pcsc::Error::ResetCard
			| pcsc::Error::UnpoweredCard
			| pcsc::Error::UnresponsiveCard
			| pcsc::Error::UnsupportedCard
			| pcsc::Error::CommError
	)
}

fn pcsc_error(err: pcsc::Error) -> io::Error {
	let kind = match err {
		pcsc::Error::Timeout => io::ErrorKind::TimedOut,
		pcsc::Error::Cancelled => io::ErrorKind::Interrupted,
		pcsc::Error::UnknownReader | pcsc::Error::ReaderUnavailable => io::ErrorKind::NotFound,
		ref card if is_card_error(card) => io::ErrorKind::Interrupted,
		_ => io::ErrorKind::Other,
	};
	io::Error::new(kind, err)
}
