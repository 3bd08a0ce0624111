use crate::dispatch::IngestDispatcher;
use crate::error::TransportError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::future::Future;

#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub received_at: DateTime<Utc>,
}

/// Anything that hands over `(topic, payload)` deliveries in arrival order.
///
/// `Ok(None)` means the source finished cleanly. Reconnecting is the source's own job;
/// an `Err` means it gave up.
pub trait MessageSource: Send {
    fn next_message(
        &mut self,
    ) -> impl Future<Output = Result<Option<InboundMessage>, TransportError>> + Send;
}

/// Feeds every delivery to the dispatcher, one at a time, until the source ends or fails.
pub async fn run_listener<M: MessageSource>(
    mut source: M,
    dispatcher: IngestDispatcher,
) -> Result<(), TransportError> {
    while let Some(message) = source.next_message().await? {
        let mut payload = message.payload.to_vec();
        dispatcher
            .handle_payload(&message.topic, &mut payload, message.received_at)
            .await;
    }
    tracing::info!("message source closed");
    Ok(())
}
