use crate::config::MessageBrokerConfig;
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use deadpool_lapin::{Config, Manager, Pool};
use futures_util::stream::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, ConnectionProperties, Consumer, ExchangeKind,
};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Receives every delivery of a subscription.
///
/// Errors are logged by the consumer loop; the delivery is acknowledged
/// either way.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, routing_key: &str, payload: &[u8]) -> Result<()>;
}

/// Message broker service trait
#[async_trait]
pub trait MessageBrokerTrait: Send + Sync {
    /// Publish a raw payload under a routing key
    async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<()>;

    /// Subscribe to a routing pattern such as `dataq.path.*`
    async fn subscribe_pattern(
        &self,
        pattern: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<String>;

    /// Unsubscribe from a subscription
    async fn unsubscribe(&self, subscription_id: &str) -> Result<()>;
}

/// RabbitMQ message broker implementation
pub struct MessageBroker {
    /// Connection pool
    pool: Pool,
    /// Configuration
    config: MessageBrokerConfig,
    /// Consumer tasks by subscription id
    subscriptions: Arc<RwLock<HashMap<String, JoinHandle<()>>>>,
    /// Default channel
    channel: Arc<Mutex<Option<Channel>>>,
}

impl MessageBroker {
    /// Create a new message broker
    pub async fn new(config: MessageBrokerConfig) -> Result<Self> {
        let pool_config = Config {
            url: Some(config.uri.clone()),
            pool: Some(deadpool_lapin::PoolConfig {
                max_size: config.pool_size as usize,
                queue_mode: deadpool::managed::QueueMode::Fifo,
                timeouts: deadpool::managed::Timeouts {
                    wait: Some(Duration::from_millis(config.timeout_ms)),
                    create: Some(Duration::from_millis(config.timeout_ms)),
                    recycle: Some(Duration::from_millis(config.timeout_ms)),
                },
            }),
            connection_properties: ConnectionProperties::default(),
        };
        let pool = pool_config.create_pool(Some(deadpool_lapin::Runtime::Tokio1))?;

        let broker = Self {
            pool,
            config,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            channel: Arc::new(Mutex::new(None)),
        };

        broker.init().await?;

        Ok(broker)
    }

    /// Make sure the device exchange exists
    async fn init(&self) -> Result<()> {
        let channel = self.get_channel().await?;

        // `amq.*` exchanges are predeclared by the server and may only be
        // declared passively
        let passive = self.config.exchange.starts_with("amq.");

        channel
            .exchange_declare(
                &self.config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    passive,
                    durable: true,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                Error::Broker(format!(
                    "Failed to declare exchange {}: {}",
                    self.config.exchange, e
                ))
            })?;

        info!(
            "RabbitMQ message broker initialized (exchange: {})",
            self.config.exchange
        );

        Ok(())
    }

    /// Get a connection from the pool with retry
    async fn get_connection(&self) -> Result<deadpool::managed::Object<Manager>> {
        let mut attempts = 0;
        let max_attempts = self.config.retry_attempts.max(1);

        loop {
            attempts += 1;
            match self.pool.get().await {
                Ok(conn) => return Ok(conn),
                Err(err) => {
                    if attempts >= max_attempts {
                        return Err(Error::Broker(format!(
                            "Failed to get RabbitMQ connection after {} attempts: {}",
                            attempts, err
                        ))
                        .into());
                    }

                    warn!(
                        "Failed to get RabbitMQ connection (attempt {}/{}): {}",
                        attempts, max_attempts, err
                    );

                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
            }
        }
    }

    /// Get the default channel or create a new one
    async fn get_channel(&self) -> Result<Channel> {
        let mut channel_guard = self.channel.lock().await;

        if let Some(channel) = &*channel_guard {
            if channel.status().connected() {
                return Ok(channel.clone());
            }
        }

        let conn = self.get_connection().await?;
        let channel = conn
            .create_channel()
            .await
            .map_err(|e| Error::Broker(format!("Failed to create RabbitMQ channel: {}", e)))?;

        *channel_guard = Some(channel.clone());

        Ok(channel)
    }

    /// Create an exclusive queue bound to the given routing pattern
    async fn create_consumer_queue(&self, pattern: &str) -> Result<(Channel, String, Consumer)> {
        let channel = self.get_channel().await?;

        let queue_name = format!("pathcast.{}.{}", pattern.replace(['.', '*', '#'], "_"), Uuid::new_v4());

        channel
            .queue_declare(
                &queue_name,
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::Broker(format!("Failed to declare queue: {}", e)))?;

        debug!("Created queue: {} for pattern: {}", queue_name, pattern);

        channel
            .queue_bind(
                &queue_name,
                &self.config.exchange,
                pattern,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::Broker(format!("Failed to bind queue: {}", e)))?;

        let consumer = channel
            .basic_consume(
                &queue_name,
                &format!("consumer-{}", Uuid::new_v4()),
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::Broker(format!("Failed to create consumer: {}", e)))?;

        Ok((channel, queue_name, consumer))
    }

    /// Start a consumer task feeding `handler`
    async fn start_consumer(&self, pattern: &str, handler: Arc<dyn DeliveryHandler>) -> Result<String> {
        let (_channel, _queue_name, mut consumer) = self.create_consumer_queue(pattern).await?;

        let subscription_id = Uuid::new_v4().to_string();
        let subscription_id_clone = subscription_id.clone();
        let pattern_owned = pattern.to_string();

        let handle = tokio::spawn(async move {
            info!(
                "Started consumer for pattern: {} (subscription: {})",
                pattern_owned, subscription_id_clone
            );

            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => {
                        let routing_key = delivery.routing_key.as_str();

                        if let Err(e) = handler.handle(routing_key, &delivery.data).await {
                            warn!("Error processing delivery on {}: {}", routing_key, e);
                        }

                        // No redelivery: a bad or unprocessable event is dropped
                        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                            error!("Failed to acknowledge message: {}", e);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving message: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }

            info!(
                "Consumer stopped for pattern: {} (subscription: {})",
                pattern_owned, subscription_id_clone
            );
        });

        self.subscriptions
            .write()
            .await
            .insert(subscription_id.clone(), handle);

        Ok(subscription_id)
    }

    /// Stop every consumer task
    pub async fn shutdown(&self) {
        let mut subscriptions = self.subscriptions.write().await;
        for (id, handle) in subscriptions.drain() {
            handle.abort();
            debug!("Stopped subscription {}", id);
        }
    }
}

#[async_trait]
impl MessageBrokerTrait for MessageBroker {
    async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<()> {
        let channel = self.get_channel().await?;

        channel
            .basic_publish(
                &self.config.exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| Error::Broker(format!("Failed to publish message: {}", e)))?;

        debug!("Published {} bytes with routing key: {}", payload.len(), routing_key);

        Ok(())
    }

    async fn subscribe_pattern(
        &self,
        pattern: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<String> {
        self.start_consumer(pattern, handler).await
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;

        if let Some(handle) = subscriptions.remove(subscription_id) {
            handle.abort();
            info!("Unsubscribed: {}", subscription_id);
            Ok(())
        } else {
            Err(Error::NotFound(format!("Subscription not found: {}", subscription_id)).into())
        }
    }
}

/// Create a message broker service
pub async fn create_message_broker(config: MessageBrokerConfig) -> Result<Arc<MessageBroker>> {
    let broker = MessageBroker::new(config).await?;

    Ok(Arc::new(broker))
}
