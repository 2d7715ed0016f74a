use std::{future::Future, time::Duration};

use rumqttc::{AsyncClient, ClientError, Event, MqttOptions, Packet, QoS};
use tokio::task::JoinHandle;

use crate::{
	config::BrokerOptions,
	publisher::{PublishError, Publisher},
};

/// Requests that can queue in the client before `publish` starts failing.
const REQUEST_CAPACITY: usize = 16;

/// Publishes to an MQTT broker.
///
/// The connection is driven by a background task, which reconnects on its own. Publishing never
/// waits: while disconnected the message is queued, and once the queue is full it is refused with
/// [`PublishError::QueueFull`].
pub struct MqttPublisher {
	client: AsyncClient,
	connection: JoinHandle<()>,
}

impl std::fmt::Debug for MqttPublisher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MqttPublisher")
			.field("connection", &self.connection)
			.finish_non_exhaustive()
	}
}

impl MqttPublisher {
	/// Start connecting to the broker. Must be called within a tokio runtime.
	pub fn connect(options: &BrokerOptions) -> Self {
		let mut mqtt = MqttOptions::new(&options.client_id, &options.host, options.port);
		mqtt.set_keep_alive(options.keep_alive);
		mqtt.set_clean_session(false);

		let (client, mut eventloop) = AsyncClient::new(mqtt, REQUEST_CAPACITY);
		let host = options.host.clone();
		let port = options.port;
		let connection = tokio::spawn(async move {
			loop {
				match eventloop.poll().await {
					Ok(Event::Incoming(Packet::ConnAck(ack))) => {
						tracing::info!(%host, port, code = ?ack.code, "connected to broker");
					}
					Ok(event) => tracing::trace!(?event, "mqtt event"),
					Err(err) => {
						tracing::warn!(%err, %host, port, "broker connection error");
						tokio::time::sleep(Duration::from_secs(1)).await;
					}
				}
			}
		});

		Self { client, connection }
	}
}

impl Publisher for MqttPublisher {
	fn publish(
		&mut self,
		topic: &str,
		payload: &[u8],
	) -> impl Future<Output = Result<(), PublishError>> + Send {
		let queued = self
			.client
			.try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec());
		async move {
			match queued {
				Ok(()) => Ok(()),
				Err(ClientError::TryRequest(_)) => Err(PublishError::QueueFull),
				Err(err) => Err(err.into()),
			}
		}
	}

	fn close(&mut self) -> impl Future<Output = ()> + Send {
		async move {
			if let Err(err) = self.client.disconnect().await {
				tracing::debug!(%err, "disconnect request not sent");
			}
			// give the event loop a moment to flush the disconnect
			tokio::time::sleep(Duration::from_millis(100)).await;
			self.connection.abort();
		}
	}
}
