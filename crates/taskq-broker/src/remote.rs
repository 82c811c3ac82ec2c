use crate::broker::unexpected;
use crate::{Broker, BrokerError, Cache, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use taskq_core::{AckId, Delivery};
use taskq_protocol::{
    AckResponse, AcknowledgeRequest, CacheKeyRequest, CacheSetRequest, EnqueueRequest, Message,
    MessageCodec, RenewRequest,
};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Broker client speaking the taskq TCP protocol to a `tq-broker` server.
///
/// Holds one connection, re-established lazily after any failure.
pub struct RemoteBroker {
    broker_address: String,
    connection: Mutex<Option<Framed<TcpStream, MessageCodec>>>,
}

impl RemoteBroker {
    /// Connect to broker
    pub async fn connect(broker_address: impl Into<String>) -> Result<Self> {
        let broker = RemoteBroker {
            broker_address: broker_address.into(),
            connection: Mutex::new(None),
        };
        broker.ping().await?;
        Ok(broker)
    }

    /// Create a client without contacting the server yet
    pub fn lazy(broker_address: impl Into<String>) -> Self {
        RemoteBroker {
            broker_address: broker_address.into(),
            connection: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.broker_address
    }

    async fn request(&self, message: Message) -> Result<AckResponse> {
        let mut connection = self.connection.lock().await;

        if connection.is_none() {
            let stream = TcpStream::connect(&self.broker_address)
                .await
                .map_err(|e| BrokerError::Connection(e.to_string()))?;
            debug!("Connected to broker at {}", self.broker_address);
            *connection = Some(Framed::new(stream, MessageCodec));
        }

        let framed = match connection.as_mut() {
            Some(framed) => framed,
            None => return Err(BrokerError::Connection("not connected".to_string())),
        };

        let response = tokio::time::timeout(REQUEST_TIMEOUT, async {
            framed.send(message).await?;
            framed.next().await.transpose()
        })
        .await;

        match response {
            Ok(Ok(Some(Message::Ack(ack)))) => Ok(ack),
            Ok(Ok(Some(Message::Nack(nack)))) => Err(BrokerError::Server {
                message: nack.error,
                transient: nack.transient,
            }),
            Ok(Ok(Some(other))) => {
                *connection = None;
                Err(unexpected(&format!("{:?}", other.message_type())))
            }
            Ok(Ok(None)) => {
                *connection = None;
                Err(BrokerError::Connection("Connection closed".to_string()))
            }
            Ok(Err(e)) => {
                warn!("Broker request failed: {}", e);
                *connection = None;
                Err(BrokerError::Connection(e.to_string()))
            }
            Err(_) => {
                *connection = None;
                Err(BrokerError::Connection(format!(
                    "Request timed out after {:?}",
                    REQUEST_TIMEOUT
                )))
            }
        }
    }
}

#[async_trait]
impl Broker for RemoteBroker {
    async fn enqueue(&self, payload: Vec<u8>) -> Result<()> {
        self.request(Message::Enqueue(EnqueueRequest { payload }))
            .await
            .map(|_| ())
    }

    async fn dequeue(&self) -> Result<Option<Delivery>> {
        Ok(self.request(Message::Dequeue).await?.delivery)
    }

    async fn queue_size(&self) -> Result<usize> {
        self.request(Message::QueueSize)
            .await?
            .size
            .map(|size| size as usize)
            .ok_or_else(|| unexpected("QueueSize response without size"))
    }

    async fn purge_queue(&self) -> Result<()> {
        self.request(Message::Purge).await.map(|_| ())
    }

    async fn acknowledge(&self, ack: &AckId) -> Result<()> {
        self.request(Message::Acknowledge(AcknowledgeRequest { ack: ack.clone() }))
            .await
            .map(|_| ())
    }

    async fn renew(&self, ack: &AckId, lease: Duration) -> Result<bool> {
        let request = RenewRequest {
            ack: ack.clone(),
            lease_ms: u64::try_from(lease.as_millis()).unwrap_or(u64::MAX),
        };
        self.request(Message::Renew(request))
            .await?
            .held
            .ok_or_else(|| unexpected("Renew response without lease state"))
    }

    async fn ping(&self) -> Result<()> {
        self.request(Message::Ping).await.map(|_| ())
    }

    fn cache(&self) -> &dyn Cache {
        self
    }
}

#[async_trait]
impl Cache for RemoteBroker {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let request = CacheKeyRequest {
            key: key.to_string(),
        };
        Ok(self.request(Message::CacheGet(request)).await?.value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let request = CacheSetRequest {
            key: key.to_string(),
            value,
            ttl_ms: ttl.map(|ttl| ttl.as_millis() as u64),
        };
        self.request(Message::CacheSet(request)).await.map(|_| ())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let request = CacheKeyRequest {
            key: key.to_string(),
        };
        self.request(Message::CacheDelete(request)).await.map(|_| ())
    }

    async fn clear(&self) -> Result<()> {
        self.request(Message::CacheClear).await.map(|_| ())
    }
}
