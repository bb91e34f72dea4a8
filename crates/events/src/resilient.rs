//! Publisher with bounded retry inside a circuit breaker.
//!
//! One publish call is one breaker request. While the breaker is Closed the
//! call may make up to `RetryPolicy::attempts()` broker round-trips with
//! exponential backoff between them; a HalfOpen trial makes exactly one.
//! The caller's deadline bounds the whole call, and the retry loop lives in the
//! call's future, so dropping that future stops it.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tracing::{Instrument, debug, info_span, warn};

use ledger_core::CallContext;

use crate::breaker::{BreakerSettings, BreakerState, CircuitBreaker};
use crate::domain::{AccountCreated, BalanceUpdated, LedgerEvent};
use crate::envelope::BrokerMessage;
use crate::event::Event;
use crate::publisher::{EventPublisher, PublishError};
use crate::retry::RetryPolicy;
use crate::transport::{BrokerTransport, TransportError};

#[derive(Debug)]
pub struct ResilientPublisher<T> {
    transport: T,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    closed: AtomicBool,
}

impl<T> ResilientPublisher<T>
where
    T: BrokerTransport,
{
    pub fn new(transport: T, retry: RetryPolicy, breaker: BreakerSettings) -> Self {
        let name = format!("publisher:{}", transport.topic());
        Self {
            transport,
            breaker: CircuitBreaker::new(name, breaker),
            retry,
            closed: AtomicBool::new(false),
        }
    }

    /// Defaults: 3 attempts from 100 ms, breaker tripping after 5 failures.
    pub fn with_defaults(transport: T) -> Self {
        Self::new(transport, RetryPolicy::default(), BreakerSettings::default())
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    async fn publish_event(
        &self,
        ctx: &CallContext,
        event: LedgerEvent,
    ) -> Result<(), PublishError> {
        let span = info_span!(
            parent: ctx.span(),
            "ledger.publish",
            event_type = event.event_type(),
            event_id = %event.event_id(),
            account_id = %event.account_id(),
            topic = %self.transport.topic(),
        );

        async {
            let message = BrokerMessage::encode(&event)?;
            self.deliver(ctx, &message).await
        }
        .instrument(span)
        .await
    }

    async fn deliver(
        &self,
        ctx: &CallContext,
        message: &BrokerMessage,
    ) -> Result<(), PublishError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PublishError::Closed);
        }
        if ctx.is_expired() {
            return Err(PublishError::DeadlineExceeded { attempts: 0 });
        }

        let permit = self.breaker.try_acquire()?;
        let max_attempts = match permit.state() {
            BreakerState::HalfOpen => 1,
            _ => self.retry.attempts(),
        };

        let attempts = AtomicU32::new(0);
        let attempt_loop = self.attempt_loop(message, max_attempts, &attempts);
        let outcome = match ctx.deadline() {
            Some(deadline) => {
                let deadline = tokio::time::Instant::from_std(deadline);
                match tokio::time::timeout_at(deadline, attempt_loop).await {
                    Ok(result) => result,
                    Err(_) => Err(PublishError::DeadlineExceeded {
                        attempts: attempts.load(Ordering::Relaxed),
                    }),
                }
            }
            None => attempt_loop.await,
        };

        match &outcome {
            Ok(()) => permit.success(),
            // Local shutdown and the caller's own deadline say nothing about
            // broker health; both settle as abandoned.
            Err(PublishError::Closed | PublishError::DeadlineExceeded { .. }) => drop(permit),
            Err(_) => permit.failure(),
        }

        outcome
    }

    async fn attempt_loop(
        &self,
        message: &BrokerMessage,
        max_attempts: u32,
        attempts: &AtomicU32,
    ) -> Result<(), PublishError> {
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            attempts.store(attempt, Ordering::Relaxed);

            match self.transport.send(message).await {
                Ok(()) => {
                    debug!(attempt, key = %message.key, "event published");
                    return Ok(());
                }
                Err(TransportError::Closed) => return Err(PublishError::Closed),
                Err(err) => {
                    last_error = err.to_string();
                    if attempt < max_attempts {
                        let backoff = self.retry.delay_for_attempt(attempt);
                        warn!(
                            attempt,
                            max_attempts,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %err,
                            "publish attempt failed; backing off"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        Err(PublishError::RetriesExhausted {
            attempts: max_attempts,
            last_error,
        })
    }
}

#[async_trait::async_trait]
impl<T> EventPublisher for ResilientPublisher<T>
where
    T: BrokerTransport,
{
    async fn publish_account_created(
        &self,
        ctx: &CallContext,
        event: &AccountCreated,
    ) -> Result<(), PublishError> {
        self.publish_event(ctx, event.clone().into()).await
    }

    async fn publish_balance_updated(
        &self,
        ctx: &CallContext,
        event: &BalanceUpdated,
    ) -> Result<(), PublishError> {
        self.publish_event(ctx, event.clone().into()).await
    }

    async fn close(&self) -> Result<(), PublishError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.transport
            .close()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::in_memory::InMemoryTransport;
    use ledger_core::{Account, AccountType, OwnerId, now_utc};

    fn publisher<T: BrokerTransport>(transport: T) -> ResilientPublisher<T> {
        ResilientPublisher::new(
            transport,
            RetryPolicy::exponential(3, Duration::from_millis(100)),
            BreakerSettings {
                failure_threshold: 2,
                interval: Duration::from_secs(60),
                open_timeout: Duration::from_secs(30),
                half_open_max_requests: 1,
            },
        )
    }

    fn created_event() -> AccountCreated {
        let account = Account::open(OwnerId::new(), Some(AccountType::Fiat), now_utc());
        AccountCreated::for_account(&account)
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_with_event_id_as_key() {
        let transport = Arc::new(InMemoryTransport::default());
        let publisher = publisher(transport.clone());
        let event = created_event();

        publisher
            .publish_account_created(&CallContext::background(), &event)
            .await
            .unwrap();

        let delivered = transport.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].key, event.event_id.to_string());
        assert_eq!(delivered[0].decode().unwrap(), LedgerEvent::AccountCreated(event));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_with_backoff() {
        let transport = Arc::new(InMemoryTransport::default());
        transport.fail_next(2);
        let publisher = publisher(transport.clone());

        let started = tokio::time::Instant::now();
        publisher
            .publish_account_created(&CallContext::background(), &created_event())
            .await
            .unwrap();

        assert_eq!(transport.attempts(), 3);
        assert_eq!(transport.delivered().len(), 1);
        // 100 ms + 200 ms of backoff between the three attempts.
        assert_eq!(started.elapsed(), Duration::from_millis(300));
        assert_eq!(publisher.breaker_state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_retries_surfaces_publish_error() {
        let transport = Arc::new(InMemoryTransport::default());
        transport.set_down(true);
        let publisher = publisher(transport.clone());

        let err = publisher
            .publish_account_created(&CallContext::background(), &created_event())
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(transport.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_fails_fast_without_broker_round_trip() {
        let transport = Arc::new(InMemoryTransport::default());
        transport.set_down(true);
        let publisher = publisher(transport.clone());
        let ctx = CallContext::background();

        for _ in 0..2 {
            let _ = publisher.publish_account_created(&ctx, &created_event()).await;
        }
        assert_eq!(publisher.breaker_state(), BreakerState::Open);
        let attempts_when_tripped = transport.attempts();

        let err = publisher
            .publish_account_created(&ctx, &created_event())
            .await
            .unwrap_err();

        assert_eq!(err, PublishError::CircuitOpen);
        assert_eq!(transport.attempts(), attempts_when_tripped);
    }

    #[tokio::test(start_paused = true)]
    async fn one_successful_trial_closes_the_breaker() {
        let transport = Arc::new(InMemoryTransport::default());
        transport.set_down(true);
        let publisher = publisher(transport.clone());
        let ctx = CallContext::background();

        for _ in 0..2 {
            let _ = publisher.publish_account_created(&ctx, &created_event()).await;
        }
        assert_eq!(publisher.breaker_state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(publisher.breaker_state(), BreakerState::HalfOpen);

        transport.set_down(false);
        publisher.publish_account_created(&ctx, &created_event()).await.unwrap();

        assert_eq!(publisher.breaker_state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_trial_is_a_single_attempt() {
        let transport = Arc::new(InMemoryTransport::default());
        transport.set_down(true);
        let publisher = publisher(transport.clone());
        let ctx = CallContext::background();

        for _ in 0..2 {
            let _ = publisher.publish_account_created(&ctx, &created_event()).await;
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        let before = transport.attempts();

        let err = publisher
            .publish_account_created(&ctx, &created_event())
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::RetriesExhausted { attempts: 1, .. }));
        assert_eq!(transport.attempts(), before + 1);
        assert_eq!(publisher.breaker_state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_abandons_the_retry_loop() {
        let transport = Arc::new(InMemoryTransport::default());
        transport.set_down(true);
        let publisher = publisher(transport.clone());
        let ctx = CallContext::background().with_timeout(Duration::from_millis(150));

        let err = publisher
            .publish_account_created(&ctx, &created_event())
            .await
            .unwrap_err();

        assert_eq!(err, PublishError::DeadlineExceeded { attempts: 2 });

        // Nothing keeps running once the call has returned.
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(transport.attempts(), 2);
    }

    /// Healthy broker that takes `latency` to acknowledge each send.
    #[derive(Debug)]
    struct SlowTransport {
        inner: InMemoryTransport,
        latency: Duration,
    }

    #[async_trait::async_trait]
    impl BrokerTransport for SlowTransport {
        fn topic(&self) -> &str {
            self.inner.topic()
        }

        async fn send(&self, message: &BrokerMessage) -> Result<(), TransportError> {
            tokio::time::sleep(self.latency).await;
            self.inner.send(message).await
        }

        async fn close(&self) -> Result<(), TransportError> {
            self.inner.close().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn impatient_callers_do_not_trip_the_breaker() {
        let transport = Arc::new(SlowTransport {
            inner: InMemoryTransport::default(),
            latency: Duration::from_millis(100),
        });
        let publisher = publisher(transport.clone());

        for _ in 0..3 {
            let hurried = CallContext::background().with_timeout(Duration::from_millis(50));
            let err = publisher
                .publish_account_created(&hurried, &created_event())
                .await
                .unwrap_err();
            assert_eq!(err, PublishError::DeadlineExceeded { attempts: 1 });
        }
        assert_eq!(publisher.breaker_state(), BreakerState::Closed);

        publisher
            .publish_account_created(&CallContext::background(), &created_event())
            .await
            .unwrap();
        assert_eq!(transport.inner.delivered().len(), 1);
        assert_eq!(publisher.breaker_state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn close_releases_the_transport() {
        let transport = Arc::new(InMemoryTransport::default());
        let publisher = publisher(transport.clone());

        publisher.close().await.unwrap();
        publisher.close().await.unwrap();

        assert!(transport.is_closed());
        let err = publisher
            .publish_account_created(&CallContext::background(), &created_event())
            .await
            .unwrap_err();
        assert_eq!(err, PublishError::Closed);
        assert_eq!(publisher.breaker_state(), BreakerState::Closed);
    }
}
