use tokio::sync::watch;

use crate::{
	config::ScanOptions,
	error::Error,
	lifecycle::{CycleOutcome, TagLifecycle},
	publisher::Publisher,
	reader::TagReader,
};

/// Create a linked stop handle and stop signal.
pub fn stop_signal() -> (StopHandle, Stop) {
	let (tx, rx) = watch::channel(false);
	(StopHandle(tx), Stop(rx))
}

/// Requests a stop. Cloning is not needed; a signal handler owns it.
#[derive(Debug)]
pub struct StopHandle(watch::Sender<bool>);

impl StopHandle {
	pub fn stop(&self) {
		self.0.send_replace(true);
	}
}

/// Observes a stop request.
#[derive(Debug, Clone)]
pub struct Stop(watch::Receiver<bool>);

impl Stop {
	pub fn is_stopped(&self) -> bool {
		*self.0.borrow()
	}

	/// Resolve once a stop has been requested.
	///
	/// Never resolves if the handle is dropped without requesting one.
	pub async fn stopped(&mut self) {
		if self.0.wait_for(|stopped| *stopped).await.is_err() {
			std::future::pending::<()>().await;
		}
	}
}

/// Runs lifecycle cycles until stopped or until polling fails for good.
pub struct Controller<R, P> {
	lifecycle: TagLifecycle<R, P>,
	stop: Stop,
	cycles: u64,
}

impl<R, P> std::fmt::Debug for Controller<R, P> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Controller")
			.field("lifecycle", &self.lifecycle)
			.field("stop", &self.stop)
			.field("cycles", &self.cycles)
			.finish()
	}
}

impl<R, P> Controller<R, P>
where
	R: TagReader,
	P: Publisher,
{
	pub fn new(reader: R, publisher: P, topic: impl ToString, options: ScanOptions, stop: Stop) -> Self {
		Self {
			lifecycle: TagLifecycle::new(reader, publisher, topic, options),
			stop,
			cycles: 0,
		}
	}

	pub fn lifecycle(&self) -> &TagLifecycle<R, P> {
		&self.lifecycle
	}

	/// Number of cycles run so far.
	pub fn cycles(&self) -> u64 {
		self.cycles
	}

	pub fn into_parts(self) -> (R, P) {
		self.lifecycle.into_parts()
	}

	/// Poll until stopped.
	///
	/// Returns `Ok` on a requested stop and the polling error otherwise. The reader and publisher
	/// are closed before returning in both cases.
	#[tracing::instrument(level = "debug", skip(self), fields(topic = self.lifecycle.topic()))]
	pub async fn run(&mut self) -> Result<(), Error> {
		let result = self.poll_until_stopped().await;
		match &result {
			Ok(()) => tracing::info!(cycles = self.cycles, "stopped"),
			Err(err) => tracing::error!(%err, cycles = self.cycles, "stopping on error"),
		}

		self.lifecycle.close().await;
		result
	}

	async fn poll_until_stopped(&mut self) -> Result<(), Error> {
		loop {
			let outcome = self.lifecycle.cycle(&mut self.stop).await?;
			self.cycles += 1;
			if outcome == CycleOutcome::Stopped {
				return Ok(());
			}
		}
	}
}
