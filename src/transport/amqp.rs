//! RabbitMQ transport over AMQP 0.9.1 (`lapin`).
//!
//! Holds one connection and one channel. When an operation fails the
//! session is dropped and the next call reconnects, re-declaring every queue
//! declared so far. Delivery tags from a dropped channel are void; the broker
//! redelivers those messages on its own.

use async_trait::async_trait;
use lapin::options::{
    BasicAckOptions, BasicGetOptions, BasicNackOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::uri::AMQPUri;
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Delivery, QueueSpec, QueueTransport, TransportError};
use crate::config::QueueConfig;

struct Session {
    connection: Connection,
    channel: Channel,
}

pub struct AmqpTransport {
    uri: AMQPUri,
    connection_name: String,
    session: Mutex<Option<Session>>,
    declared: Mutex<Vec<QueueSpec>>,
}

impl AmqpTransport {
    /// Open the connection and channel up front so bad credentials or an
    /// unreachable broker fail startup instead of the first poll.
    pub async fn connect(config: &QueueConfig, connection_name: &str) -> Result<Self, TransportError> {
        let transport = Self {
            uri: build_uri(config),
            connection_name: connection_name.to_string(),
            session: Mutex::new(None),
            declared: Mutex::new(Vec::new()),
        };
        let session = transport.open().await?;
        *transport.session.lock().await = Some(session);
        info!(
            host = %config.host,
            port = config.port,
            vhost = %config.vhost,
            "amqp connected"
        );
        Ok(transport)
    }

    /// Close the connection; later calls reconnect.
    pub async fn close(&self) {
        let session = self.session.lock().await.take();
        if let Some(session) = session
            && let Err(e) = session.connection.close(200, "consumer stopped").await
        {
            debug!("amqp close: {e}");
        }
    }

    async fn open(&self) -> Result<Session, TransportError> {
        let connection = Connection::connect_uri(
            self.uri.clone(),
            ConnectionProperties::default().with_connection_name(self.connection_name.clone().into()),
        )
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| TransportError::Connect(format!("channel: {e}")))?;

        Ok(Session { connection, channel })
    }

    /// Current channel, reconnecting (and re-declaring) if the last session
    /// was dropped.
    async fn channel(&self) -> Result<Channel, TransportError> {
        let mut session = self.session.lock().await;
        if let Some(s) = session.as_ref() {
            return Ok(s.channel.clone());
        }

        warn!("amqp session lost, reconnecting");
        let fresh = self.open().await?;
        for spec in self.declared.lock().await.iter() {
            declare(&fresh.channel, spec).await?;
        }
        let channel = fresh.channel.clone();
        *session = Some(fresh);
        Ok(channel)
    }

    async fn invalidate(&self) {
        self.session.lock().await.take();
    }
}

#[async_trait]
impl QueueTransport for AmqpTransport {
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), TransportError> {
        let channel = self.channel().await?;
        if let Err(e) = declare(&channel, spec).await {
            self.invalidate().await;
            return Err(e);
        }
        let mut declared = self.declared.lock().await;
        if !declared.contains(spec) {
            declared.push(spec.clone());
        }
        Ok(())
    }

    async fn fetch_one(&self, queue: &str) -> Result<Option<Delivery>, TransportError> {
        let channel = self.channel().await?;
        match channel.basic_get(queue, BasicGetOptions { no_ack: false }).await {
            Ok(Some(message)) => Ok(Some(Delivery {
                tag: message.delivery.delivery_tag,
                redelivered: message.delivery.redelivered,
                body: message.delivery.data.clone(),
            })),
            Ok(None) => Ok(None),
            Err(e) => {
                self.invalidate().await;
                Err(TransportError::Fetch { queue: queue.to_string(), reason: e.to_string() })
            }
        }
    }

    async fn ack(&self, tag: u64) -> Result<(), TransportError> {
        let channel = self.channel().await?;
        if let Err(e) = channel.basic_ack(tag, BasicAckOptions::default()).await {
            self.invalidate().await;
            return Err(TransportError::Ack { tag, reason: e.to_string() });
        }
        Ok(())
    }

    async fn nack(&self, tag: u64, requeue: bool) -> Result<(), TransportError> {
        let channel = self.channel().await?;
        let options = BasicNackOptions { requeue, ..Default::default() };
        if let Err(e) = channel.basic_nack(tag, options).await {
            self.invalidate().await;
            return Err(TransportError::Nack { tag, reason: e.to_string() });
        }
        Ok(())
    }
}

/// Declare `spec` on `channel`, with its dead-letter exchange and queue when
/// requested.
async fn declare(channel: &Channel, spec: &QueueSpec) -> Result<(), TransportError> {
    let fail = |queue: &str, e: lapin::Error| TransportError::Declare {
        queue: queue.to_string(),
        reason: e.to_string(),
    };

    let mut args = FieldTable::default();
    if spec.dead_letter {
        let dlx = spec.dead_letter_exchange();
        let dlq = spec.dead_letter_queue();

        channel
            .exchange_declare(
                &dlx,
                ExchangeKind::Direct,
                ExchangeDeclareOptions { durable: spec.durable, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .map_err(|e| fail(&dlx, e))?;
        channel
            .queue_declare(
                &dlq,
                QueueDeclareOptions { durable: spec.durable, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .map_err(|e| fail(&dlq, e))?;
        channel
            .queue_bind(&dlq, &dlx, &spec.name, QueueBindOptions::default(), FieldTable::default())
            .await
            .map_err(|e| fail(&dlq, e))?;

        args.insert("x-dead-letter-exchange".into(), AMQPValue::LongString(dlx.into()));
        args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(spec.name.clone().into()),
        );
    }

    channel
        .queue_declare(
            &spec.name,
            QueueDeclareOptions { durable: spec.durable, ..Default::default() },
            args,
        )
        .await
        .map_err(|e| fail(&spec.name, e))?;

    debug!(queue = %spec.name, dead_letter = spec.dead_letter, "queue declared");
    Ok(())
}

fn build_uri(config: &QueueConfig) -> AMQPUri {
    let mut uri = AMQPUri::default();
    uri.authority.host = config.host.clone();
    uri.authority.port = config.port;
    uri.authority.userinfo.username = config.user.clone();
    uri.authority.userinfo.password = config.password.clone();
    uri.vhost = config.vhost.clone();
    uri
}
