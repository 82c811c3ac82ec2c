use crate::{config::BrokerConfig, metrics::BrokerMetrics, Broker, BrokerError, MemoryBroker};
use taskq_protocol::{AckResponse, Message, MessageCodec, NackResponse};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Serves a `MemoryBroker` over the taskq TCP protocol
pub struct BrokerServer {
    config: Arc<BrokerConfig>,
    broker: Arc<MemoryBroker>,
    metrics: Arc<BrokerMetrics>,
    connections: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl BrokerServer {
    pub fn new(config: BrokerConfig) -> anyhow::Result<Self> {
        let broker = MemoryBroker::with_lease(config.lease());
        let metrics = BrokerMetrics::new()?;
        let connections = Semaphore::new(config.broker.max_connections.max(1));

        Ok(BrokerServer {
            config: Arc::new(config),
            broker: Arc::new(broker),
            metrics: Arc::new(metrics),
            connections: Arc::new(connections),
            shutdown: CancellationToken::new(),
        })
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let addr = self.config.address();
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        let local: SocketAddr = listener.local_addr()?;
        info!("Broker listening on {}", local);

        let server = self.clone();
        tokio::spawn(async move {
            server.background_tasks().await;
        });

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let permit = match self.connections.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    warn!("Connection limit reached, rejecting {}", addr);
                                    continue;
                                }
                            };
                            debug!("New connection from {}", addr);
                            let server = self.clone();
                            tokio::spawn(async move {
                                server.metrics.connections.inc();
                                if let Err(e) = server.handle_connection(stream).await {
                                    error!("Connection error: {}", e);
                                }
                                server.metrics.connections.dec();
                                drop(permit);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("Shutting down broker");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a client connection
    async fn handle_connection(&self, stream: TcpStream) -> anyhow::Result<()> {
        let mut framed = Framed::new(stream, MessageCodec);

        loop {
            let next = tokio::select! {
                next = framed.next() => next,
                _ = self.shutdown.cancelled() => break,
            };

            match next {
                Some(Ok(message)) => {
                    let response = self.handle_message(message).await;
                    framed.send(response).await?;
                }
                Some(Err(e)) => {
                    error!("Protocol error: {}", e);
                    break;
                }
                None => break,
            }
        }

        Ok(())
    }

    /// Handle a protocol message
    async fn handle_message(&self, message: Message) -> Message {
        let broker: &dyn crate::Broker = self.broker.as_ref();
        let cache = broker.cache();

        let result = match message {
            Message::Enqueue(req) => broker.enqueue(req.payload).await.map(|_| {
                self.metrics.inc_payloads("enqueued");
                AckResponse::default()
            }),
            Message::Dequeue => broker.dequeue().await.map(|delivery| {
                if delivery.is_some() {
                    self.metrics.inc_payloads("dequeued");
                }
                AckResponse {
                    delivery,
                    ..Default::default()
                }
            }),
            Message::Acknowledge(req) => broker.acknowledge(&req.ack).await.map(|_| {
                self.metrics.inc_payloads("acknowledged");
                AckResponse::default()
            }),
            Message::Renew(req) => {
                let lease = Duration::from_millis(req.lease_ms);
                broker.renew(&req.ack, lease).await.map(|held| {
                    if held {
                        self.metrics.inc_payloads("renewed");
                    }
                    AckResponse {
                        held: Some(held),
                        ..Default::default()
                    }
                })
            }
            Message::QueueSize => broker.queue_size().await.map(|size| AckResponse {
                size: Some(size as u64),
                ..Default::default()
            }),
            Message::Purge => broker.purge_queue().await.map(|_| {
                info!("Queue purged");
                AckResponse::default()
            }),
            Message::Ping => Ok(AckResponse::default()),
            Message::CacheGet(req) => cache.get(&req.key).await.map(|value| {
                self.metrics.inc_cache_op("get");
                AckResponse {
                    value,
                    ..Default::default()
                }
            }),
            Message::CacheSet(req) => {
                let ttl = req.ttl_ms.map(Duration::from_millis);
                cache.set(&req.key, req.value, ttl).await.map(|_| {
                    self.metrics.inc_cache_op("set");
                    AckResponse::default()
                })
            }
            Message::CacheDelete(req) => cache.delete(&req.key).await.map(|_| {
                self.metrics.inc_cache_op("delete");
                AckResponse::default()
            }),
            Message::CacheClear => cache.clear().await.map(|_| {
                self.metrics.inc_cache_op("clear");
                AckResponse::default()
            }),
            Message::Ack(_) | Message::Nack(_) => {
                return Message::Nack(NackResponse {
                    error: "Unsupported message type".to_string(),
                    transient: false,
                })
            }
        };

        match result {
            Ok(ack) => Message::Ack(ack),
            Err(e) => Message::Nack(nack(e)),
        }
    }

    /// Background tasks (lease reclaim, cache sweep, metrics)
    async fn background_tasks(&self) {
        let mut interval = tokio::time::interval(self.config.reclaim_interval());

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.reclaim_expired();
                    self.update_metrics().await;
                }
                _ = self.shutdown.cancelled() => {
                    break;
                }
            }
        }
    }

    /// Re-publish deliveries whose consumer never acknowledged them
    fn reclaim_expired(&self) {
        let reclaimed = self.broker.reclaim_expired();
        if reclaimed > 0 {
            self.metrics.add_payloads("reclaimed", reclaimed as u64);
        }

        let evicted = self.broker.memory_cache().purge_expired();
        if evicted > 0 {
            debug!("Evicted {} expired cache entries", evicted);
        }
    }

    async fn update_metrics(&self) {
        match self.broker.queue_size().await {
            Ok(depth) => self.metrics.update_queue(depth, self.broker.in_flight()),
            Err(e) => warn!("Failed to read queue size: {}", e),
        }
    }

    /// Get metrics registry
    pub fn metrics(&self) -> Arc<BrokerMetrics> {
        self.metrics.clone()
    }

    /// Get the served broker
    pub fn broker(&self) -> Arc<MemoryBroker> {
        self.broker.clone()
    }

    /// Shutdown the broker
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

fn nack(error: BrokerError) -> NackResponse {
    NackResponse {
        transient: error.is_transient(),
        error: error.to_string(),
    }
}
