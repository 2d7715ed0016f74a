/// Errors that stop the scanner.
///
/// Problems with a single tag never surface here; see [`TagError`](crate::store::TagError).
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("unable to open reader {device}: {source}")]
	Setup {
		device: String,
		#[source]
		source: std::io::Error,
	},

	#[error("an error occurred during polling: {0}")]
	Poll(#[source] std::io::Error),
}
