use std::future::Future;

/// A message bus that tag events are sent to.
///
/// Implementations deliver at least once and never retain messages. Delivery failures after the
/// call returns are the implementation's business; the scanner does not retry.
pub trait Publisher {
	fn publish(
		&mut self,
		topic: &str,
		payload: &[u8],
	) -> impl Future<Output = Result<(), PublishError>> + Send;

	/// Disconnect from the bus.
	fn close(&mut self) -> impl Future<Output = ()> + Send {
		async {}
	}
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
	#[cfg(feature = "mqtt")]
	#[error("mqtt client: {0}")]
	Mqtt(#[from] rumqttc::ClientError),

	/// The publisher could not take the message without waiting.
	#[error("publish queue is full")]
	QueueFull,

	#[error("publisher is closed")]
	Closed,
}
