use std::time::Duration;

use crate::reader::{BaudRate, Modulation, ModulationType};

/// First page of user memory; pages 0-3 hold the UID, lock and capability bytes.
pub const FIRST_DATA_PAGE: u8 = 4;

/// Bytes per page of tag memory.
pub const PAGE_SIZE: usize = 4;

/// Page count of the NTAG21x layout read by default.
pub const NTAG21X_MAX_PAGES: u8 = 45;

/// Duration of one poll period unit.
pub const POLL_PERIOD_UNIT: Duration = Duration::from_millis(150);

/// Prefix every published identifier must carry.
pub const IDENTIFIER_PREFIX: &[u8] = b"enpanopticon_";

/// Payload published when a tag leaves the reader.
pub const REMOVED_PAYLOAD: &[u8] = b"removed";

/// Options for the polling and decoding cycle.
///
/// Defaults match the deployed scanners: a single ISO 14443-A modulation polled 20 times with a
/// period of 2 units, 45 pages of NTAG21x memory, and the `enpanopticon_` identifier prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
	/// Modulations the reader polls for.
	///
	/// Only ISO 14443-A targets are decoded; others are waited out and reported as removed.
	pub modulations: Vec<Modulation>,

	/// Number of polling attempts per modulation in one poll call.
	///
	/// Defaults to 20.
	pub poll_attempts: u8,

	/// Period between polling attempts, in units of [`POLL_PERIOD_UNIT`].
	///
	/// Defaults to 2.
	pub poll_period: u8,

	/// One past the last page read from the tag.
	///
	/// Defaults to [`NTAG21X_MAX_PAGES`].
	pub page_limit: u8,

	/// Prefix a decoded text record must start with to be published.
	///
	/// Defaults to [`IDENTIFIER_PREFIX`].
	pub identifier_prefix: Vec<u8>,

	/// Pause between two presence checks while waiting for a tag to leave.
	///
	/// Defaults to 50ms.
	pub removal_interval: Duration,
}

impl Default for ScanOptions {
	fn default() -> Self {
		Self {
			modulations: vec![Modulation {
				kind: ModulationType::Iso14443a,
				baud: BaudRate::Kbps106,
			}],
			poll_attempts: 20,
			poll_period: 2,
			page_limit: NTAG21X_MAX_PAGES,
			identifier_prefix: IDENTIFIER_PREFIX.to_vec(),
			removal_interval: Duration::from_millis(50),
		}
	}
}

impl ScanOptions {
	pub fn with_modulations(mut self, modulations: Vec<Modulation>) -> Self {
		self.modulations = modulations;
		self
	}

	pub fn with_poll_attempts(mut self, poll_attempts: u8) -> Self {
		self.poll_attempts = poll_attempts;
		self
	}

	pub fn with_poll_period(mut self, poll_period: u8) -> Self {
		self.poll_period = poll_period;
		self
	}

	pub fn with_page_limit(mut self, page_limit: u8) -> Self {
		self.page_limit = page_limit;
		self
	}

	pub fn with_identifier_prefix(mut self, identifier_prefix: impl Into<Vec<u8>>) -> Self {
		self.identifier_prefix = identifier_prefix.into();
		self
	}

	pub fn with_removal_interval(mut self, removal_interval: Duration) -> Self {
		self.removal_interval = removal_interval;
		self
	}

	/// Upper bound on how long one poll call may block.
	pub fn poll_budget(&self) -> Duration {
		POLL_PERIOD_UNIT
			* u32::from(self.poll_attempts)
			* u32::from(self.poll_period)
			* u32::try_from(self.modulations.len()).unwrap_or(u32::MAX)
	}
}

/// Connection settings for the message broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerOptions {
	/// Defaults to `localhost`.
	pub host: String,

	/// Defaults to 1883.
	pub port: u16,

	/// Defaults to `nfc-scanner`.
	pub client_id: String,

	/// Defaults to 60 seconds.
	pub keep_alive: Duration,
}

impl Default for BrokerOptions {
	fn default() -> Self {
		Self {
			host: "localhost".into(),
			port: 1883,
			client_id: "nfc-scanner".into(),
			keep_alive: Duration::from_secs(60),
		}
	}
}

impl BrokerOptions {
	pub fn new(host: impl ToString, port: u16) -> Self {
		Self {
			host: host.to_string(),
			port,
			..Self::default()
		}
	}

	pub fn with_client_id(mut self, client_id: impl ToString) -> Self {
		self.client_id = client_id.to_string();
		self
	}

	pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
		self.keep_alive = keep_alive;
		self
	}
}
