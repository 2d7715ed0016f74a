use crate::{
	config::ScanOptions,
	controller::Stop,
	error::Error,
	event::TagEvent,
	ndef,
	publisher::Publisher,
	reader::{is_transient, TagReader, Target},
	store::{RawTagStore, TagError},
	validate::{validate, ValidatedPayload},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
	/// No tag known.
	Idle,

	/// Waiting on the reader's poll.
	Polling,

	/// A target was found and is being read.
	TagPresent,

	/// The target was dealt with; waiting for it to leave.
	WaitingForRemoval,

	/// Stopped, or polling failed for good.
	Aborted,
}

/// How one cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
	/// Nothing answered the poll.
	NoTarget,

	/// A target arrived and left. `presented` is whether its identifier was published.
	Removed { presented: bool },

	/// The stop signal was observed.
	Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removal {
	Confirmed,
	Stopped,
}

/// Drives a reader through poll, read, publish and removal, one tag at a time.
pub struct TagLifecycle<R, P> {
	reader: R,
	publisher: P,
	topic: String,
	options: ScanOptions,
	state: LifecycleState,
	path: Vec<LifecycleState>,
}

impl<R, P> std::fmt::Debug for TagLifecycle<R, P> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TagLifecycle")
			.field("reader", &std::any::type_name::<R>())
			.field("publisher", &std::any::type_name::<P>())
			.field("topic", &self.topic)
			.field("options", &self.options)
			.field("state", &self.state)
			.finish()
	}
}

impl<R, P> TagLifecycle<R, P>
where
	R: TagReader,
	P: Publisher,
{
	pub fn new(reader: R, publisher: P, topic: impl ToString, options: ScanOptions) -> Self {
		Self {
			reader,
			publisher,
			topic: topic.to_string(),
			options,
			state: LifecycleState::Idle,
			path: Vec::new(),
		}
	}

	pub fn state(&self) -> LifecycleState {
		self.state
	}

	/// States entered during the last cycle, in order.
	pub fn last_cycle(&self) -> &[LifecycleState] {
		&self.path
	}

	pub fn topic(&self) -> &str {
		&self.topic
	}

	pub fn reader(&self) -> &R {
		&self.reader
	}

	pub fn publisher(&self) -> &P {
		&self.publisher
	}

	pub fn into_parts(self) -> (R, P) {
		(self.reader, self.publisher)
	}

	/// Run one cycle, from idle back to idle.
	///
	/// Polls once. A found target is read, decoded and validated; only a valid identifier is
	/// published as present. The cycle then waits for the target to leave and publishes its
	/// removal, valid or not. Tag problems are logged and skipped. Returns an error only when the
	/// reader fails in a way polling cannot recover from.
	pub async fn cycle(&mut self, stop: &mut Stop) -> Result<CycleOutcome, Error> {
		self.path.clear();
		if stop.is_stopped() {
			self.enter(LifecycleState::Aborted);
			return Ok(CycleOutcome::Stopped);
		}

		self.enter(LifecycleState::Polling);
		tracing::debug!(
			budget = ?self.options.poll_budget(),
			attempts = self.options.poll_attempts,
			period = self.options.poll_period,
			modulations = self.options.modulations.len(),
			"polling"
		);

		let ScanOptions {
			modulations,
			poll_attempts,
			poll_period,
			..
		} = &self.options;
		let polled = tokio::select! {
			biased;
			() = stop.stopped() => None,
			polled = self.reader.poll(modulations, *poll_attempts, *poll_period) => Some(polled),
		};

		let Some(polled) = polled else {
			tracing::info!("stop requested while polling");
			self.reader.abort().await;
			self.enter(LifecycleState::Aborted);
			return Ok(CycleOutcome::Stopped);
		};

		let target = match polled {
			Ok(Some(target)) => target,
			Ok(None) => {
				tracing::debug!("no target present");
				self.enter(LifecycleState::Idle);
				return Ok(CycleOutcome::NoTarget);
			}
			Err(err) if is_transient(&err) => {
				tracing::debug!(%err, "polling timed out");
				self.enter(LifecycleState::Idle);
				return Ok(CycleOutcome::NoTarget);
			}
			Err(err) => {
				self.enter(LifecycleState::Aborted);
				return Err(Error::Poll(err));
			}
		};

		self.enter(LifecycleState::TagPresent);
		tracing::info!(uid = %target.uid_hex(), modulation = ?target.modulation, "target present");
		let presented = self.present(&target, stop).await;

		self.enter(LifecycleState::WaitingForRemoval);
		let removal = self.wait_for_removal(&target, stop).await;
		tracing::info!(uid = %target.uid_hex(), "target removed");
		self.publish(TagEvent::absent(&self.topic), stop).await;

		match removal {
			Removal::Confirmed => {
				self.enter(LifecycleState::Idle);
				Ok(CycleOutcome::Removed { presented })
			}
			Removal::Stopped => {
				self.enter(LifecycleState::Aborted);
				Ok(CycleOutcome::Stopped)
			}
		}
	}

	/// Release both capabilities.
	pub async fn close(&mut self) {
		self.reader.close().await;
		self.publisher.close().await;
	}

	fn enter(&mut self, state: LifecycleState) {
		tracing::trace!(from = ?self.state, to = ?state, "lifecycle transition");
		self.state = state;
		self.path.push(state);
	}

	/// Publish the target's identifier if it has one. Returns whether it was published.
	async fn present(&mut self, target: &Target, stop: &mut Stop) -> bool {
		if !target.is_supported() {
			tracing::debug!(modulation = ?target.modulation, "tag is not an NTAG21x or Ultralight, ignoring");
			return false;
		}

		match self.read_identifier(target).await {
			Ok(payload) => {
				tracing::info!(identifier = %payload.identifier(), "identifier present");
				self.publish(TagEvent::present(&self.topic, payload), stop).await;
				true
			}
			Err(err @ (TagError::ConnectFailed(_) | TagError::ReadFailed { .. })) => {
				tracing::error!(%err, "could not read tag");
				false
			}
			Err(err) => {
				tracing::debug!(%err, "skipping tag");
				false
			}
		}
	}

	async fn read_identifier(&mut self, target: &Target) -> Result<ValidatedPayload, TagError> {
		self.reader
			.connect(target)
			.await
			.map_err(TagError::ConnectFailed)?;

		let store = RawTagStore::read(&mut self.reader, target, self.options.page_limit).await?;
		let record = ndef::decode(store.as_bytes())?;
		Ok(validate(record.text, &self.options.identifier_prefix)?)
	}

	async fn wait_for_removal(&mut self, target: &Target, stop: &mut Stop) -> Removal {
		tracing::debug!("waiting for target removal");
		loop {
			if stop.is_stopped() {
				return Removal::Stopped;
			}

			match self.reader.is_present(target).await {
				Ok(true) => {}
				Ok(false) => return Removal::Confirmed,
				Err(err) => {
					tracing::error!(%err, "an error occurred waiting for target removal");
					return Removal::Confirmed;
				}
			}

			tokio::select! {
				biased;
				() = stop.stopped() => return Removal::Stopped,
				() = tokio::time::sleep(self.options.removal_interval) => {}
			}
		}
	}

	/// Hand the event to the publisher. A publish still pending when a stop arrives is dropped.
	async fn publish(&mut self, event: TagEvent, stop: &mut Stop) {
		tracing::debug!(topic = event.topic(), payload = ?bstr::BStr::new(event.payload()), "publishing");
		let published = tokio::select! {
			biased;
			published = self.publisher.publish(event.topic(), event.payload()) => Some(published),
			() = stop.stopped() => None,
		};

		match published {
			Some(Ok(())) => {}
			Some(Err(err)) => tracing::warn!(%err, topic = event.topic(), "publish failed"),
			None => tracing::warn!(topic = event.topic(), "stop requested while publishing, event dropped"),
		}
	}
}

#[cfg(test)]
mod tests {
	use std::{io, time::Duration};

	use super::*;
	use crate::{
		controller::stop_signal,
		impls::in_memory::{tag_memory, PollStep, RecordingPublisher, ScriptedReader},
		reader::ModulationType,
	};

	const TOPIC: &str = "front-door";

	fn ntag() -> Target {
		Target::new(ModulationType::Iso14443a, [0x04, 0x2a, 0x11, 0x9c, 0xd2, 0x61, 0x5b])
	}

	/// Tag memory holding one well-known text record with status byte 0x02.
	fn text_tag(text: &[u8]) -> Vec<u8> {
		let length = u8::try_from(text.len()).unwrap();
		let mut user = vec![0x03, length + 5, 0xd1, 0x01, length + 1, b'T', 0x02];
		user.extend_from_slice(text);
		user.push(0xfe);
		tag_memory(&user)
	}

	fn lifecycle(reader: ScriptedReader) -> TagLifecycle<ScriptedReader, RecordingPublisher> {
		TagLifecycle::new(
			reader,
			RecordingPublisher::new(),
			TOPIC,
			ScanOptions::default().with_removal_interval(Duration::from_millis(1)),
		)
	}

	fn messages(lifecycle: &TagLifecycle<ScriptedReader, RecordingPublisher>) -> Vec<(&str, &[u8])> {
		lifecycle
			.publisher()
			.messages()
			.iter()
			.map(|(topic, payload)| (topic.as_str(), payload.as_slice()))
			.collect()
	}

	#[tokio::test]
	async fn valid_tag_is_present_then_removed() {
		let (_handle, mut stop) = stop_signal();
		let mut lifecycle = lifecycle(
			ScriptedReader::new()
				.with_poll(PollStep::Found(ntag()))
				.with_memory(text_tag(b"enpanopticon_1"))
				.with_present_for(3),
		);

		let outcome = lifecycle.cycle(&mut stop).await.unwrap();

		assert_eq!(outcome, CycleOutcome::Removed { presented: true });
		assert_eq!(
			messages(&lifecycle),
			vec![
				(TOPIC, &b"enpanopticon_1"[..]),
				(TOPIC, &b"removed"[..]),
			]
		);
		assert_eq!(
			lifecycle.last_cycle(),
			&[
				LifecycleState::Polling,
				LifecycleState::TagPresent,
				LifecycleState::WaitingForRemoval,
				LifecycleState::Idle,
			]
		);
		assert_eq!(lifecycle.state(), LifecycleState::Idle);
	}

	#[tokio::test]
	async fn minimal_record_layout_is_published_verbatim() {
		let (_handle, mut stop) = stop_signal();
		let mut user = vec![0x03, 0x00, 0x03, 0x03, 15, b'T', 0x02];
		user.extend_from_slice(b"enpanopticon_1");
		let mut lifecycle = lifecycle(
			ScriptedReader::new()
				.with_poll(PollStep::Found(ntag()))
				.with_memory(tag_memory(&user)),
		);

		lifecycle.cycle(&mut stop).await.unwrap();

		let published = messages(&lifecycle);
		assert_eq!(published[0].1, b"enpanopticon_1");
		assert_eq!(published[0].1.len(), 15 - 1);
	}

	#[tokio::test]
	async fn wrong_prefix_only_reports_removal() {
		let (_handle, mut stop) = stop_signal();
		let mut lifecycle = lifecycle(
			ScriptedReader::new()
				.with_poll(PollStep::Found(ntag()))
				.with_memory(text_tag(b"other_1234"))
				.with_present_for(1),
		);

		let outcome = lifecycle.cycle(&mut stop).await.unwrap();

		assert_eq!(outcome, CycleOutcome::Removed { presented: false });
		assert_eq!(messages(&lifecycle), vec![(TOPIC, &b"removed"[..])]);
	}

	#[tokio::test]
	async fn blank_tag_only_reports_removal() {
		let (_handle, mut stop) = stop_signal();
		let mut lifecycle = lifecycle(
			ScriptedReader::new()
				.with_poll(PollStep::Found(ntag()))
				.with_memory(tag_memory(&[])),
		);

		let outcome = lifecycle.cycle(&mut stop).await.unwrap();

		assert_eq!(outcome, CycleOutcome::Removed { presented: false });
		assert_eq!(messages(&lifecycle), vec![(TOPIC, &b"removed"[..])]);
	}

	#[tokio::test]
	async fn uri_record_only_reports_removal() {
		let (_handle, mut stop) = stop_signal();
		let mut lifecycle = lifecycle(
			ScriptedReader::new()
				.with_poll(PollStep::Found(ntag()))
				.with_memory(tag_memory(b"\x03\x0b\xd1\x01\x07U\x04a.bc\xfe")),
		);

		let outcome = lifecycle.cycle(&mut stop).await.unwrap();

		assert_eq!(outcome, CycleOutcome::Removed { presented: false });
		assert_eq!(messages(&lifecycle), vec![(TOPIC, &b"removed"[..])]);
	}

	#[tokio::test]
	async fn read_failure_only_reports_removal() {
		let (_handle, mut stop) = stop_signal();
		let mut lifecycle = lifecycle(
			ScriptedReader::new()
				.with_poll(PollStep::Found(ntag()))
				.with_memory(text_tag(b"enpanopticon_1"))
				.with_failing_page(12),
		);

		let outcome = lifecycle.cycle(&mut stop).await.unwrap();

		assert_eq!(outcome, CycleOutcome::Removed { presented: false });
		assert_eq!(messages(&lifecycle), vec![(TOPIC, &b"removed"[..])]);
		assert_eq!(lifecycle.reader().pages_read().last(), Some(&11));
	}

	#[tokio::test]
	async fn refused_connect_only_reports_removal() {
		let (_handle, mut stop) = stop_signal();
		let mut lifecycle = lifecycle(
			ScriptedReader::new()
				.with_poll(PollStep::Found(ntag()))
				.with_memory(text_tag(b"enpanopticon_1"))
				.with_refused_connect(),
		);

		let outcome = lifecycle.cycle(&mut stop).await.unwrap();

		assert_eq!(outcome, CycleOutcome::Removed { presented: false });
		assert!(lifecycle.reader().pages_read().is_empty());
		assert_eq!(messages(&lifecycle), vec![(TOPIC, &b"removed"[..])]);
	}

	#[tokio::test]
	async fn unsupported_technology_is_waited_out() {
		let (_handle, mut stop) = stop_signal();
		let mut lifecycle = lifecycle(
			ScriptedReader::new()
				.with_poll(PollStep::Found(Target::new(ModulationType::Felica, [0x01, 0x2e])))
				.with_memory(text_tag(b"enpanopticon_1"))
				.with_present_for(2),
		);

		let outcome = lifecycle.cycle(&mut stop).await.unwrap();

		assert_eq!(outcome, CycleOutcome::Removed { presented: false });
		assert_eq!(
			lifecycle.last_cycle(),
			&[
				LifecycleState::Polling,
				LifecycleState::TagPresent,
				LifecycleState::WaitingForRemoval,
				LifecycleState::Idle,
			]
		);
		assert!(lifecycle.reader().pages_read().is_empty());
		assert_eq!(messages(&lifecycle), vec![(TOPIC, &b"removed"[..])]);
	}

	#[tokio::test]
	async fn empty_polls_never_publish() {
		let (_handle, mut stop) = stop_signal();
		let mut lifecycle = lifecycle(
			ScriptedReader::new()
				.with_poll(PollStep::Nothing)
				.with_poll(PollStep::Timeout)
				.with_poll(PollStep::Fail(io::ErrorKind::Interrupted)),
		);

		for _ in 0..5 {
			let outcome = lifecycle.cycle(&mut stop).await.unwrap();
			assert_eq!(outcome, CycleOutcome::NoTarget);
			assert_eq!(lifecycle.state(), LifecycleState::Idle);
			assert_eq!(
				lifecycle.last_cycle(),
				&[LifecycleState::Polling, LifecycleState::Idle]
			);
		}

		assert!(lifecycle.publisher().messages().is_empty());
		assert_eq!(lifecycle.reader().polled(), 5);
	}

	#[tokio::test]
	async fn device_error_aborts() {
		let (_handle, mut stop) = stop_signal();
		let mut lifecycle = lifecycle(
			ScriptedReader::new().with_poll(PollStep::Fail(io::ErrorKind::BrokenPipe)),
		);

		let err = lifecycle.cycle(&mut stop).await.unwrap_err();

		assert!(matches!(err, Error::Poll(ref source) if source.kind() == io::ErrorKind::BrokenPipe));
		assert_eq!(lifecycle.state(), LifecycleState::Aborted);
		assert!(lifecycle.publisher().messages().is_empty());
	}

	#[tokio::test]
	async fn stop_before_cycle_does_not_poll() {
		let (handle, mut stop) = stop_signal();
		let mut lifecycle = lifecycle(ScriptedReader::new().with_poll(PollStep::Found(ntag())));

		handle.stop();
		let outcome = lifecycle.cycle(&mut stop).await.unwrap();

		assert_eq!(outcome, CycleOutcome::Stopped);
		assert_eq!(lifecycle.state(), LifecycleState::Aborted);
		assert_eq!(lifecycle.reader().polled(), 0);
	}

	#[tokio::test]
	async fn stop_while_polling_aborts_the_poll() {
		let (handle, mut stop) = stop_signal();
		let mut lifecycle = lifecycle(ScriptedReader::new().with_poll(PollStep::Hang));

		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(20)).await;
			handle.stop();
		});
		let outcome = lifecycle.cycle(&mut stop).await.unwrap();

		assert_eq!(outcome, CycleOutcome::Stopped);
		assert_eq!(lifecycle.reader().aborted(), 1);
		assert!(lifecycle.publisher().messages().is_empty());
	}

	#[tokio::test]
	async fn stop_while_waiting_still_reports_removal() {
		let (handle, mut stop) = stop_signal();
		let mut lifecycle = lifecycle(
			ScriptedReader::new()
				.with_poll(PollStep::Found(ntag()))
				.with_memory(text_tag(b"enpanopticon_1"))
				.with_present_for(usize::MAX),
		);

		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(20)).await;
			handle.stop();
		});
		let outcome = lifecycle.cycle(&mut stop).await.unwrap();

		assert_eq!(outcome, CycleOutcome::Stopped);
		assert_eq!(
			messages(&lifecycle),
			vec![
				(TOPIC, &b"enpanopticon_1"[..]),
				(TOPIC, &b"removed"[..]),
			]
		);
	}

	#[tokio::test]
	async fn stop_ends_a_publish_that_never_completes() {
		let (handle, mut stop) = stop_signal();
		let mut lifecycle = TagLifecycle::new(
			ScriptedReader::new()
				.with_poll(PollStep::Found(ntag()))
				.with_memory(text_tag(b"enpanopticon_1"))
				.with_present_for(usize::MAX),
			RecordingPublisher::stalled(),
			TOPIC,
			ScanOptions::default().with_removal_interval(Duration::from_millis(1)),
		);

		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(20)).await;
			handle.stop();
		});
		let outcome = tokio::time::timeout(Duration::from_secs(5), lifecycle.cycle(&mut stop))
			.await
			.expect("cycle should end once stopped")
			.unwrap();

		assert_eq!(outcome, CycleOutcome::Stopped);
		assert_eq!(lifecycle.state(), LifecycleState::Aborted);
		assert_eq!(
			messages(&lifecycle),
			vec![
				(TOPIC, &b"enpanopticon_1"[..]),
				(TOPIC, &b"removed"[..]),
			]
		);
	}

	#[tokio::test]
	async fn failed_presence_check_counts_as_removal() {
		let (_handle, mut stop) = stop_signal();
		let mut lifecycle = lifecycle(
			ScriptedReader::new()
				.with_poll(PollStep::Found(ntag()))
				.with_memory(text_tag(b"enpanopticon_1"))
				.with_presence_error(),
		);

		let outcome = lifecycle.cycle(&mut stop).await.unwrap();

		assert_eq!(outcome, CycleOutcome::Removed { presented: true });
		assert_eq!(messages(&lifecycle).len(), 2);
	}

	#[tokio::test]
	async fn publish_failure_does_not_stop_the_cycle() {
		let (_handle, mut stop) = stop_signal();
		let mut lifecycle = TagLifecycle::new(
			ScriptedReader::new()
				.with_poll(PollStep::Found(ntag()))
				.with_memory(text_tag(b"enpanopticon_1")),
			RecordingPublisher::failing(),
			TOPIC,
			ScanOptions::default(),
		);

		let outcome = lifecycle.cycle(&mut stop).await.unwrap();

		assert_eq!(outcome, CycleOutcome::Removed { presented: true });
		assert_eq!(lifecycle.publisher().messages().len(), 2);
	}

	#[tokio::test]
	async fn page_limit_bounds_the_read() {
		let (_handle, mut stop) = stop_signal();
		let mut lifecycle = TagLifecycle::new(
			ScriptedReader::new()
				.with_poll(PollStep::Found(ntag()))
				.with_memory(text_tag(b"enpanopticon_1")),
			RecordingPublisher::new(),
			TOPIC,
			ScanOptions::default().with_page_limit(10),
		);

		let outcome = lifecycle.cycle(&mut stop).await.unwrap();

		assert_eq!(outcome, CycleOutcome::Removed { presented: true });
		assert_eq!(lifecycle.reader().pages_read(), (4..10u8).collect::<Vec<_>>());
		assert_eq!(lifecycle.publisher().messages()[0].1, b"enpanopticon_1");
	}

	#[tokio::test]
	async fn page_limit_too_small_for_the_record() {
		let (_handle, mut stop) = stop_signal();
		let mut lifecycle = TagLifecycle::new(
			ScriptedReader::new()
				.with_poll(PollStep::Found(ntag()))
				.with_memory(text_tag(b"enpanopticon_1")),
			RecordingPublisher::new(),
			TOPIC,
			ScanOptions::default().with_page_limit(6),
		);

		let outcome = lifecycle.cycle(&mut stop).await.unwrap();

		assert_eq!(outcome, CycleOutcome::Removed { presented: false });
		assert_eq!(messages(&lifecycle), vec![(TOPIC, &b"removed"[..])]);
	}

	#[tokio::test]
	async fn custom_prefix() {
		let (_handle, mut stop) = stop_signal();
		let mut lifecycle = TagLifecycle::new(
			ScriptedReader::new()
				.with_poll(PollStep::Found(ntag()))
				.with_memory(text_tag(b"enbadge_42")),
			RecordingPublisher::new(),
			TOPIC,
			ScanOptions::default().with_identifier_prefix("enbadge_"),
		);

		lifecycle.cycle(&mut stop).await.unwrap();

		assert_eq!(lifecycle.publisher().messages()[0].1, b"enbadge_42");
	}
}
