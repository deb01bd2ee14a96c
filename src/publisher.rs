use crate::address::Address;
use crate::errors::*;
use crate::Message;
use amiquip::{Channel, Confirm, ConfirmSmoother, Publish, Return};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, trace};
use snafu::{OptionExt, ResultExt};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Message ids of the form `<uuid>_<n>`; the uuid is fixed per generator and `n` counts from 0.
#[derive(Debug)]
pub(crate) struct MessageIds {
    prefix: String,
    next: u64,
}

impl MessageIds {
    pub(crate) fn new() -> MessageIds {
        MessageIds {
            prefix: Uuid::new_v4().to_string(),
            next: 0,
        }
    }

    pub(crate) fn next_id(&mut self) -> String {
        let id = format!("{}_{}", self.prefix, self.next);
        self.next += 1;
        id
    }
}

/// Publishes messages on a single channel and waits for the broker to confirm each one.
///
/// Messages are published with `mandatory` set, so a message the broker cannot route to any
/// queue fails with [`Error::Unroutable`](enum.Error.html#variant.Unroutable) instead of being
/// dropped silently.
pub struct Publisher {
    channel: Channel,
    confirms: Receiver<Confirm>,
    returns: Receiver<Return>,
    smoother: ConfirmSmoother,
    ids: MessageIds,
}

impl Publisher {
    /// Puts `channel` into confirm mode. The channel must not have published anything yet.
    pub fn new(channel: Channel) -> Result<Publisher> {
        // listeners must be registered before confirm mode is enabled
        let returns = channel.listen_for_returns().context(AmqpSnafu)?;
        let confirms = channel
            .listen_for_publisher_confirms()
            .context(AmqpSnafu)?;
        channel.enable_publisher_confirms().context(AmqpSnafu)?;
        Ok(Publisher {
            channel,
            confirms,
            returns,
            smoother: ConfirmSmoother::new(),
            ids: MessageIds::new(),
        })
    }

    /// Publishes `message` to the node named by `address` and returns the message id once the
    /// broker has confirmed it. `None` waits for the confirm indefinitely.
    pub fn publish(
        &mut self,
        address: &Address,
        message: &Message,
        timeout: Option<Duration>,
    ) -> Result<String> {
        let (exchange, routing_key) = address.node().publish_target().context(MissingNodeSnafu {
            address: address.to_string(),
        })?;

        let message_id = self.ids.next_id();
        debug!("publishing message {} to {}", message_id, address);

        let timestamp = chrono::Utc::now().timestamp().max(0) as u64;
        let properties = message.to_properties(&message_id, timestamp);
        let mut publish = Publish::with_properties(message.body(), routing_key, properties);
        publish.mandatory = true;
        self.channel
            .basic_publish(exchange, publish)
            .context(AmqpSnafu)?;

        await_confirm(
            &self.confirms,
            &self.returns,
            &mut self.smoother,
            address,
            &message_id,
            timeout,
        )?;
        Ok(message_id)
    }

    pub fn close(self) -> Result<()> {
        self.channel.close().context(AmqpSnafu)
    }
}

/// Waits for the confirm of the single in-flight message `message_id`. A return that arrived
/// before the ack turns the ack into `Unroutable`.
fn await_confirm(
    confirms: &Receiver<Confirm>,
    returns: &Receiver<Return>,
    smoother: &mut ConfirmSmoother,
    address: &Address,
    message_id: &str,
    timeout: Option<Duration>,
) -> Result<()> {
    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    loop {
        let raw = match deadline {
            Some(deadline) => confirms.recv_deadline(deadline),
            None => confirms.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        let raw = match raw {
            Ok(raw) => raw,
            Err(RecvTimeoutError::Timeout) => {
                return ConfirmTimeoutSnafu {
                    address: address.to_string(),
                    timeout: timeout.unwrap_or_default(),
                }
                .fail();
            }
            Err(RecvTimeoutError::Disconnected) => {
                return ConfirmChannelClosedSnafu {
                    address: address.to_string(),
                }
                .fail();
            }
        };
        trace!("raw confirm {:?}", raw);

        // one message is in flight, so at most one smoothed confirm can come out
        let mut confirmed = None;
        for confirm in smoother.process(raw) {
            confirmed = Some(confirm);
        }

        match confirmed {
            Some(Confirm::Ack(_)) => {
                // the broker sends basic.return before the ack of an unroutable mandatory message
                return match returns.try_recv() {
                    Ok(returned) => UnroutableSnafu {
                        address: address.to_string(),
                        message_id,
                        reply_code: returned.reply_code,
                        reply_text: returned.reply_text,
                    }
                    .fail(),
                    Err(_) => Ok(()),
                };
            }
            Some(Confirm::Nack(_)) => {
                return RejectedSnafu {
                    address: address.to_string(),
                    message_id,
                }
                .fail();
            }
            None => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amiquip::{AmqpProperties, ConfirmPayload};
    use crossbeam_channel::unbounded;

    #[test]
    fn message_ids_count_up() {
        let mut ids = MessageIds::new();
        let first = ids.next_id();
        let second = ids.next_id();

        let (prefix, n) = first.rsplit_once('_').unwrap();
        assert_eq!(n, "0");
        assert_eq!(prefix.len(), 36);
        assert_eq!(second, format!("{}_1", prefix));
    }

    #[test]
    fn message_ids_differ_per_generator() {
        assert_ne!(MessageIds::new().next_id(), MessageIds::new().next_id());
    }

    fn address() -> Address {
        Address::parse("amqp://localhost/test-queue.abc").unwrap()
    }

    fn ack(delivery_tag: u64) -> Confirm {
        Confirm::Ack(ConfirmPayload {
            delivery_tag,
            multiple: false,
        })
    }

    fn returned() -> Return {
        Return {
            reply_code: 312,
            reply_text: "NO_ROUTE".to_string(),
            exchange: String::new(),
            routing_key: "test-queue.abc".to_string(),
            content: b"hello".to_vec(),
            properties: AmqpProperties::default(),
        }
    }

    fn wait(
        confirms: &Receiver<Confirm>,
        returns: &Receiver<Return>,
        smoother: &mut ConfirmSmoother,
        timeout: Option<Duration>,
    ) -> Result<()> {
        await_confirm(confirms, returns, smoother, &address(), "id_0", timeout)
    }

    #[test]
    fn confirm_ack() {
        let (confirm_tx, confirms) = unbounded();
        let (_return_tx, returns) = unbounded();
        let mut smoother = ConfirmSmoother::new();

        confirm_tx.send(ack(1)).unwrap();
        wait(&confirms, &returns, &mut smoother, None).unwrap();

        confirm_tx.send(ack(2)).unwrap();
        wait(&confirms, &returns, &mut smoother, Some(Duration::from_secs(5))).unwrap();
    }

    #[test]
    fn confirm_waits_for_in_order_tag() {
        let (confirm_tx, confirms) = unbounded();
        let (_return_tx, returns) = unbounded();
        let mut smoother = ConfirmSmoother::new();

        // tag 2 is held back by the smoother until tag 1 shows up
        confirm_tx.send(ack(2)).unwrap();
        confirm_tx.send(ack(1)).unwrap();
        wait(&confirms, &returns, &mut smoother, Some(Duration::from_secs(5))).unwrap();
    }

    #[test]
    fn confirm_nack() {
        let (confirm_tx, confirms) = unbounded();
        let (_return_tx, returns) = unbounded();
        confirm_tx
            .send(Confirm::Nack(ConfirmPayload {
                delivery_tag: 1,
                multiple: false,
            }))
            .unwrap();

        match wait(&confirms, &returns, &mut ConfirmSmoother::new(), None) {
            Err(Error::Rejected { message_id, .. }) => assert_eq!(message_id, "id_0"),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn confirm_timeout() {
        let (_confirm_tx, confirms) = unbounded::<Confirm>();
        let (_return_tx, returns) = unbounded();
        let timeout = Duration::from_millis(20);

        match wait(&confirms, &returns, &mut ConfirmSmoother::new(), Some(timeout)) {
            Err(Error::ConfirmTimeout { timeout: t, address }) => {
                assert_eq!(t, timeout);
                assert_eq!(address, "amqp://localhost:5672/test-queue.abc");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn confirm_channel_closed() {
        let (confirm_tx, confirms) = unbounded::<Confirm>();
        let (_return_tx, returns) = unbounded();
        drop(confirm_tx);

        for timeout in [None, Some(Duration::from_secs(5))] {
            match wait(&confirms, &returns, &mut ConfirmSmoother::new(), timeout) {
                Err(Error::ConfirmChannelClosed { .. }) => (),
                other => panic!("unexpected result {:?}", other),
            }
        }
    }

    #[test]
    fn return_before_ack_is_unroutable() {
        let (confirm_tx, confirms) = unbounded();
        let (return_tx, returns) = unbounded();
        return_tx.send(returned()).unwrap();
        confirm_tx.send(ack(1)).unwrap();

        match wait(&confirms, &returns, &mut ConfirmSmoother::new(), None) {
            Err(Error::Unroutable {
                message_id,
                reply_code,
                reply_text,
                ..
            }) => {
                assert_eq!(message_id, "id_0");
                assert_eq!(reply_code, 312);
                assert_eq!(reply_text, "NO_ROUTE");
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(returns.is_empty());
    }
}
