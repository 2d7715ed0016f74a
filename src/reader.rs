pub use tag_read::TagReader;
pub use target::{BaudRate, Modulation, ModulationType, Target};

mod tag_read;
mod target;

/// Whether a poll error only means nothing answered in time.
///
/// Readers report an empty field as [`TimedOut`](std::io::ErrorKind::TimedOut). Transport hiccups
/// during polling surface as [`Interrupted`](std::io::ErrorKind::Interrupted) and are retried the
/// same way; every other kind ends the polling loop.
pub fn is_transient(err: &std::io::Error) -> bool {
	matches!(
		err.kind(),
		std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
	)
}
