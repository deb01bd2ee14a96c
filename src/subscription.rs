use crate::address::{Address, Node};
use crate::errors::*;
use crate::{ConnectionBuilder, Message};
use amiquip::{
    Channel, Connection, ConsumerMessage, ConsumerOptions, FieldTable, QueueDeclareOptions,
};
use log::{debug, info};
use snafu::ResultExt;
use std::ops::ControlFlow;

/// A consumer attached to the queue behind an address.
///
/// For a queue address the queue must already exist, unless the messenger was told to
/// [declare queues](struct.Messenger.html#method.declare_queues). For an `exchange/routing-key`
/// address an exclusive, server-named queue is bound to the (existing) exchange.
pub struct Subscription {
    // field order matters: the channel must drop before its connection
    channel: Channel,
    connection: Connection,
    queue: String,
    address: Address,
}

impl Subscription {
    pub(crate) fn open(
        builder: &ConnectionBuilder,
        address: Address,
        declare: bool,
    ) -> Result<Subscription> {
        let mut connection = builder.open()?;
        let channel = connection.open_channel(None).context(AmqpSnafu)?;

        let queue = match address.node() {
            Node::Queue(name) => {
                let queue = if declare {
                    channel.queue_declare(name.as_str(), QueueDeclareOptions::default())
                } else {
                    channel.queue_declare_passive(name.as_str())
                }
                .context(AmqpSnafu)?;
                queue.name().to_string()
            }
            Node::Routed {
                exchange,
                routing_key,
            } => {
                let exchange = channel
                    .exchange_declare_passive(exchange.as_str())
                    .context(AmqpSnafu)?;
                let queue = channel
                    .queue_declare(
                        "",
                        QueueDeclareOptions {
                            exclusive: true,
                            ..QueueDeclareOptions::default()
                        },
                    )
                    .context(AmqpSnafu)?;
                queue
                    .bind(&exchange, routing_key.as_str(), FieldTable::new())
                    .context(AmqpSnafu)?;
                queue.name().to_string()
            }
            Node::None => {
                return MissingNodeSnafu {
                    address: address.to_string(),
                }
                .fail();
            }
        };
        debug!("subscribed to {} via queue {}", address, queue);

        Ok(Subscription {
            channel,
            connection,
            queue,
            address,
        })
    }

    /// The name of the queue being consumed.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Consumes messages, handing each to `on_message`. A message is acked once `on_message`
    /// returns `Ok`; an error from `on_message` is returned without acking, leaving the message
    /// to be redelivered. Returning `ControlFlow::Break` cancels the consumer and returns
    /// `Ok(())`.
    pub fn listen<F>(&self, mut on_message: F) -> Result<()>
    where
        F: FnMut(Message) -> Result<ControlFlow<()>>,
    {
        let consumer = self
            .channel
            .basic_consume(self.queue.as_str(), ConsumerOptions::default())
            .context(AmqpSnafu)?;
        info!("waiting for messages on {}", self.address);

        for message in consumer.receiver().iter() {
            match message {
                ConsumerMessage::Delivery(delivery) => {
                    let message = Message::from_parts(
                        self.address.to_string(),
                        delivery.body.clone(),
                        &delivery.properties,
                    );
                    let flow = on_message(message)?;
                    consumer.ack(delivery).context(AmqpSnafu)?;
                    if flow.is_break() {
                        consumer.cancel().context(AmqpSnafu)?;
                        return Ok(());
                    }
                }
                other => {
                    return ConsumerEndedSnafu {
                        queue: self.queue.as_str(),
                        reason: format!("{:?}", other),
                    }
                    .fail();
                }
            }
        }

        ConsumerEndedSnafu {
            queue: self.queue.as_str(),
            reason: "consumer channel disconnected",
        }
        .fail()
    }

    pub fn close(self) -> Result<()> {
        let Subscription {
            channel,
            connection,
            ..
        } = self;
        channel.close().context(AmqpSnafu)?;
        connection.close().context(AmqpSnafu)
    }
}
