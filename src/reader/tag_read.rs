use std::future::Future;

use super::{Modulation, Target};

/// A contactless reader able to detect tags and read their memory.
///
/// Methods take `&mut self` and are called strictly one after the other; no two operations are
/// ever in flight at once. A poll future may be dropped before completion when the scanner is
/// stopped, after which [`abort`](TagReader::abort) is called.
pub trait TagReader {
	/// Poll for a target.
	///
	/// Tries each modulation `attempts` times, `period` units of
	/// [`POLL_PERIOD_UNIT`](crate::config::POLL_PERIOD_UNIT) apart. Returns `Ok(None)` or an
	/// error of kind [`TimedOut`](std::io::ErrorKind::TimedOut) when nothing answered; see
	/// [`is_transient`](crate::reader::is_transient) for which errors end the scanner.
	fn poll(
		&mut self,
		modulations: &[Modulation],
		attempts: u8,
		period: u8,
	) -> impl Future<Output = std::io::Result<Option<Target>>> + Send;

	/// Prepare a detected target for page reads.
	///
	/// The default does nothing, for readers that select the tag while polling.
	fn connect(&mut self, _target: &Target) -> impl Future<Output = std::io::Result<()>> + Send {
		async { Ok(()) }
	}

	/// Read one 4-byte page of tag memory.
	fn read_page(
		&mut self,
		target: &Target,
		page: u8,
	) -> impl Future<Output = std::io::Result<[u8; 4]>> + Send;

	/// Check, without blocking for long, whether the target is still in the field.
	///
	/// An error means the check itself failed; the scanner then gives up on the target.
	fn is_present(&mut self, target: &Target) -> impl Future<Output = std::io::Result<bool>> + Send;

	/// Cancel an in-flight poll on the device side.
	fn abort(&mut self) -> impl Future<Output = ()> + Send;

	/// Release the device.
	fn close(&mut self) -> impl Future<Output = ()> + Send {
		async {}
	}
}
