use crate::messaging::broker::{create_message_broker, DeliveryHandler, MessageBrokerTrait};
use crate::config::MessageBrokerConfig;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

#[derive(Default)]
struct Collect {
    received: Mutex<Vec<(String, Vec<u8>)>>,
}

#[async_trait]
impl DeliveryHandler for Collect {
    async fn handle(&self, routing_key: &str, payload: &[u8]) -> Result<()> {
        self.received
            .lock()
            .unwrap()
            .push((routing_key.to_string(), payload.to_vec()));
        Ok(())
    }
}

// Test that we can create a message broker
#[tokio::test]
async fn test_create_message_broker() -> Result<()> {
    // Skip test if no RabbitMQ is available
    if std::env::var("TEST_RABBITMQ").is_err() {
        println!("Skipping RabbitMQ test. Set TEST_RABBITMQ=1 to run.");
        return Ok(());
    }

    let config = MessageBrokerConfig::default();
    let _broker = create_message_broker(config).await?;

    Ok(())
}

// Deliveries under the path topic reach the handler with their routing key
#[tokio::test]
async fn test_pattern_subscription_receives_device_topics() -> Result<()> {
    if std::env::var("TEST_RABBITMQ").is_err() {
        println!("Skipping RabbitMQ test. Set TEST_RABBITMQ=1 to run.");
        return Ok(());
    }

    let config = MessageBrokerConfig {
        exchange: format!("test.exchange.{}", uuid::Uuid::new_v4()),
        ..MessageBrokerConfig::default()
    };
    let pattern = config.binding_pattern();

    let broker = create_message_broker(config).await?;
    let handler = Arc::new(Collect::default());

    let sub_id = broker.subscribe_pattern(&pattern, handler.clone()).await?;

    sleep(Duration::from_millis(500)).await;

    broker
        .publish("dataq.path.ACCC8E000001", br#"{"class":"Human"}"#)
        .await?;
    broker
        .publish("dataq.status.ACCC8E000001", br#"{"online":true}"#)
        .await?;

    sleep(Duration::from_millis(1000)).await;

    {
        let received = handler.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, "dataq.path.ACCC8E000001");
    }

    broker.unsubscribe(&sub_id).await?;
    assert!(broker.unsubscribe(&sub_id).await.is_err());

    Ok(())
}
