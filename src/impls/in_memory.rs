//! Capabilities backed by memory, for tests and dry runs.

use std::{collections::VecDeque, future::Future, io};

use crate::{
	config::{NTAG21X_MAX_PAGES, PAGE_SIZE},
	controller::StopHandle,
	publisher::{PublishError, Publisher},
	reader::{Modulation, TagReader, Target},
};

/// Full NTAG21x memory with `user` written from page 4 onwards.
pub fn tag_memory(user: &[u8]) -> Vec<u8> {
	let mut memory = vec![
		0x04, 0x2a, 0x11, 0x9c, // uid
		0xd2, 0x61, 0x5b, 0x80, // uid
		0x08, 0x48, 0x00, 0x00, // lock
		0xe1, 0x10, 0x12, 0x00, // capability container
	];
	memory.extend_from_slice(user);
	memory.resize(usize::from(NTAG21X_MAX_PAGES) * PAGE_SIZE, 0);
	memory
}

/// What one poll returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep {
	Found(Target),
	Nothing,
	Timeout,
	Fail(io::ErrorKind),

	/// Never answer, like a reader waiting out its whole poll budget.
	Hang,
}

/// A reader that replays a script of poll results over one tag memory.
///
/// Each found target stays present for a configured number of checks. Once the script runs out,
/// polls time out, or trip the stop handle if one was given.
#[derive(Debug, Default)]
pub struct ScriptedReader {
	polls: VecDeque<PollStep>,
	memory: Vec<u8>,
	failing_page: Option<u8>,
	refuse_connect: bool,
	present_for: usize,
	presence_error: bool,
	remaining_presence: usize,
	stop_when_exhausted: Option<StopHandle>,

	pages_read: Vec<u8>,
	polled: usize,
	aborted: usize,
	closed: bool,
}

impl ScriptedReader {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_poll(mut self, step: PollStep) -> Self {
		self.polls.push_back(step);
		self
	}

	pub fn with_memory(mut self, memory: Vec<u8>) -> Self {
		self.memory = memory;
		self
	}

	pub fn with_failing_page(mut self, page: u8) -> Self {
		self.failing_page = Some(page);
		self
	}

	pub fn with_refused_connect(mut self) -> Self {
		self.refuse_connect = true;
		self
	}

	/// Number of presence checks that report a found target before it leaves.
	pub fn with_present_for(mut self, checks: usize) -> Self {
		self.present_for = checks;
		self
	}

	/// Make presence checks fail instead of answering.
	pub fn with_presence_error(mut self) -> Self {
		self.presence_error = true;
		self
	}

	pub fn with_stop_when_exhausted(mut self, stop: StopHandle) -> Self {
		self.stop_when_exhausted = Some(stop);
		self
	}

	/// Pages read so far, in order.
	pub fn pages_read(&self) -> &[u8] {
		&self.pages_read
	}

	pub fn polled(&self) -> usize {
		self.polled
	}

	pub fn aborted(&self) -> usize {
		self.aborted
	}

	pub fn is_closed(&self) -> bool {
		self.closed
	}
}

impl TagReader for ScriptedReader {
	fn poll(
		&mut self,
		_modulations: &[Modulation],
		_attempts: u8,
		_period: u8,
	) -> impl Future<Output = io::Result<Option<Target>>> + Send {
		async move {
			self.polled += 1;
			match self.polls.pop_front() {
				Some(PollStep::Found(target)) => {
					self.remaining_presence = self.present_for;
					Ok(Some(target))
				}
				Some(PollStep::Nothing) => Ok(None),
				Some(PollStep::Timeout) => Err(io::ErrorKind::TimedOut.into()),
				Some(PollStep::Fail(kind)) => Err(kind.into()),
				Some(PollStep::Hang) => std::future::pending().await,
				None => match &self.stop_when_exhausted {
					Some(stop) => {
						stop.stop();
						Ok(None)
					}
					None => Err(io::ErrorKind::TimedOut.into()),
				},
			}
		}
	}

	fn connect(&mut self, _target: &Target) -> impl Future<Output = io::Result<()>> + Send {
		async move {
			if self.refuse_connect {
				Err(io::Error::new(io::ErrorKind::ConnectionRefused, "tag did not answer select"))
			} else {
				Ok(())
			}
		}
	}

	fn read_page(
		&mut self,
		_target: &Target,
		page: u8,
	) -> impl Future<Output = io::Result<[u8; 4]>> + Send {
		async move {
			if self.failing_page == Some(page) {
				return Err(io::Error::other("rf transmission error"));
			}

			let start = usize::from(page) * PAGE_SIZE;
			let data = self
				.memory
				.get(start..start + PAGE_SIZE)
				.ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
			self.pages_read.push(page);
			let mut out = [0; 4];
			out.copy_from_slice(data);
			Ok(out)
		}
	}

	fn is_present(&mut self, _target: &Target) -> impl Future<Output = io::Result<bool>> + Send {
		async move {
			if self.presence_error {
				return Err(io::Error::other("reader stopped answering"));
			}

			if self.remaining_presence == 0 {
				return Ok(false);
			}

			self.remaining_presence -= 1;
			Ok(true)
		}
	}

	fn abort(&mut self) -> impl Future<Output = ()> + Send {
		async move {
			self.aborted += 1;
		}
	}

	fn close(&mut self) -> impl Future<Output = ()> + Send {
		async move {
			self.closed = true;
		}
	}
}

/// A publisher that keeps every message it is given.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
	messages: Vec<(String, Vec<u8>)>,
	failing: bool,
	stalled: bool,
	closed: bool,
}

impl RecordingPublisher {
	pub fn new() -> Self {
		Self::default()
	}

	/// Record messages but report every publish as failed.
	pub fn failing() -> Self {
		Self {
			failing: true,
			..Self::default()
		}
	}

	/// Record messages but never complete a publish, like a client whose queue is full.
	pub fn stalled() -> Self {
		Self {
			stalled: true,
			..Self::default()
		}
	}

	/// Messages published so far, as `(topic, payload)`.
	pub fn messages(&self) -> &[(String, Vec<u8>)] {
		&self.messages
	}

	pub fn is_closed(&self) -> bool {
		self.closed
	}
}

impl Publisher for RecordingPublisher {
	fn publish(
		&mut self,
		topic: &str,
		payload: &[u8],
	) -> impl Future<Output = Result<(), PublishError>> + Send {
		async move {
			if self.closed {
				return Err(PublishError::Closed);
			}

			self.messages.push((topic.to_string(), payload.to_vec()));
			if self.stalled {
				std::future::pending::<()>().await;
			}

			if self.failing {
				Err(PublishError::Closed)
			} else {
				Ok(())
			}
		}
	}

	fn close(&mut self) -> impl Future<Output = ()> + Send {
		async move {
			self.closed = true;
		}
	}
}
