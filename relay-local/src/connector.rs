use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::broker::LocalBroker;
use crate::error::LocalError;
use crate::QoS;

/// An established connection that has not been handed over to the relay yet
#[async_trait]
pub trait Session: Send {
    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), LocalError>;

    fn into_broker(self) -> LocalBroker;
}

/// Opens new sessions with the local broker
#[async_trait]
pub trait Connect: Send + Sync {
    type Session: Session;

    async fn connect(&self) -> Result<Self::Session, LocalError>;
}

/// Obtain a broker handle subscribed to the given topics, or `None` if the
/// broker could not be reached
#[async_trait]
pub trait LocalConnector: Send + Sync {
    async fn connect_and_subscribe(&self, topics: &[&str]) -> Option<LocalBroker>;
}

/// Fixed delay retry policy
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_tries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: 3,
            delay: Duration::from_secs(5),
        }
    }
}

pub struct LocalBrokerConnector<C> {
    connector: C,
    policy: RetryPolicy,
}

impl<C: Connect> LocalBrokerConnector<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(self, policy: RetryPolicy) -> Self {
        Self { policy, ..self }
    }

    /// Connect unless a previous attempt already did, then subscribe to
    /// every topic in order. A subscribe failure fails the whole attempt,
    /// and the next one reconnects only if the connection was lost.
    async fn attempt(
        &self,
        session: &mut Option<C::Session>,
        topics: &[&str],
    ) -> Result<(), LocalError> {
        if session.is_none() {
            *session = Some(self.connector.connect().await?);
            info!("connected to local broker");
        }

        if let Some(session) = session.as_mut() {
            for topic in topics {
                session.subscribe(topic, QoS::AtLeastOnce).await?;
                info!("subscribed to topic: {topic}");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl<C: Connect> LocalConnector for LocalBrokerConnector<C> {
    #[instrument(name = "local", skip_all)]
    async fn connect_and_subscribe(&self, topics: &[&str]) -> Option<LocalBroker> {
        let mut session = None;
        let mut tries = 0;

        loop {
            tries += 1;
            match self.attempt(&mut session, topics).await {
                Ok(()) => return session.map(Session::into_broker),
                Err(err) => {
                    warn!("cannot connect to local broker: {err}");
                    if err.is_connection_lost() {
                        session = None;
                    }
                    if tries >= self.policy.max_tries {
                        warn!("retries exhausted");
                        return None;
                    }
                    info!("retry in {} seconds", self.policy.delay.as_secs());
                    tokio::time::sleep(self.policy.delay).await;
                }
            }
        }
    }
}
