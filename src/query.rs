//! # Query/response correlation over the bus.
//!
//! Turns "publish a query, wait for the matching response" into one awaitable
//! call.
//!
//! ## Flow
//! ```text
//! query(bus, factory, cancel)
//!   ├─► id = CorrelationId::new()
//!   ├─► sub = bus.subscribe::<Q::Response>(filter: resp.id == id)   ◄── strictly before publish
//!   │         first match ─► oneshot.send(resp.clone()) + sub.dispose()
//!   │         later matches / other ids ─► ignored
//!   ├─► bus.publish(factory(id))
//!   └─► select (biased) {
//!         oneshot        ─► Ok(response)    ◄── checked first: an answer already in hand wins
//!         cancel fired   ─► Err(QueryError::Canceled)
//!       }
//!       (sub is owned by this future: every exit path disposes it)
//! ```
//!
//! Subscribing first matters: a responder answering synchronously inside the
//! query's own dispatch would otherwise reply before anyone listens.
//!
//! There is no implicit timeout; pass a token with a deadline or use
//! [`query_timeout`].

use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::bus::{Bus, CorrelationId, Query, Response, Subscription};
use crate::error::{HandlerError, QueryError};

/// Publishes the query built by `factory` and awaits its response.
///
/// ## Example
/// ```rust
/// use tokio_util::sync::CancellationToken;
/// use modvisor::{Bus, CorrelationId, Query, Response, query, respond};
///
/// struct GetAnswerQuery { id: CorrelationId }
/// #[derive(Clone)]
/// struct GetAnswerResponse { id: CorrelationId, value: u32 }
///
/// impl Query for GetAnswerQuery {
///     type Response = GetAnswerResponse;
///     fn correlation_id(&self) -> CorrelationId { self.id }
/// }
/// impl Response for GetAnswerResponse {
///     fn correlation_id(&self) -> CorrelationId { self.id }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let bus = Bus::new();
/// let _responder = respond(&bus, "answer", |q: &GetAnswerQuery| {
///     Ok(GetAnswerResponse { id: q.id, value: 42 })
/// });
///
/// let resp = query(&bus, |id| GetAnswerQuery { id }, &CancellationToken::new())
///     .await
///     .unwrap();
/// assert_eq!(resp.value, 42);
/// # }
/// ```
pub async fn query<Q, F>(
    bus: &Bus,
    factory: F,
    cancel: &CancellationToken,
) -> Result<Q::Response, QueryError>
where
    Q: Query,
    F: FnOnce(CorrelationId) -> Q,
{
    let id = CorrelationId::new();
    let (tx, rx) = oneshot::channel::<Q::Response>();
    let _sub = await_response::<Q::Response>(bus, id, tx);

    bus.publish(factory(id));

    tokio::select! {
        biased;
        res = rx => match res {
            Ok(resp) => Ok(resp),
            // The sender lives in the subscription; it can only vanish if the bus dropped it.
            Err(_) => Err(QueryError::Canceled),
        },
        _ = cancel.cancelled() => {
            tracing::debug!(correlation = %id, "query cancelled before a response arrived");
            Err(QueryError::Canceled)
        }
    }
}

/// Like [`query`], but also gives up after `timeout`.
pub async fn query_timeout<Q, F>(
    bus: &Bus,
    factory: F,
    cancel: &CancellationToken,
    timeout: Duration,
) -> Result<Q::Response, QueryError>
where
    Q: Query,
    F: FnOnce(CorrelationId) -> Q,
{
    match tokio::time::timeout(timeout, query(bus, factory, cancel)).await {
        Ok(res) => res,
        Err(_elapsed) => Err(QueryError::TimedOut { timeout }),
    }
}

/// Registers a synchronous responder for `Q`.
///
/// Every query is answered by publishing the value `answer` returns.
/// An `Err` is a regular handler fault: logged, nothing is published.
pub fn respond<Q, F>(bus: &Bus, name: impl Into<Arc<str>>, answer: F) -> Subscription
where
    Q: Query,
    F: Fn(&Q) -> Result<Q::Response, HandlerError> + Send + Sync + 'static,
{
    let out = Arc::downgrade(&bus.inner);
    bus.subscribe(name, move |q: &Q| {
        let resp = answer(q)?;
        if let Some(bus) = Bus::from_weak(&out) {
            bus.publish(resp);
        }
        Ok(())
    })
}

/// Subscribes the one-shot response filter for `id`.
///
/// The returned cell is the only strong owner of the subscription; the
/// handler holds a weak ref so dropping the cell always disposes it.
fn await_response<R: Response>(
    bus: &Bus,
    id: CorrelationId,
    tx: oneshot::Sender<R>,
) -> Arc<OnceLock<Subscription>> {
    let slot: Mutex<Option<oneshot::Sender<R>>> = Mutex::new(Some(tx));
    let own: Arc<OnceLock<Subscription>> = Arc::new(OnceLock::new());

    let me: Weak<OnceLock<Subscription>> = Arc::downgrade(&own);
    let sub = bus.subscribe(format!("query:{id}"), move |resp: &R| {
        if resp.correlation_id() != id {
            return Ok(());
        }
        let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(sender) = sender {
            let _ = sender.send(resp.clone());
            if let Some(cell) = me.upgrade() {
                if let Some(sub) = cell.get() {
                    sub.dispose();
                }
            }
        }
        Ok(())
    });
    let _ = own.set(sub);
    own
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct GetValueQuery {
        id: CorrelationId,
        key: &'static str,
    }

    #[derive(Debug, Clone)]
    struct GetValueResponse {
        id: CorrelationId,
        value: String,
    }

    impl Query for GetValueQuery {
        type Response = GetValueResponse;
        fn correlation_id(&self) -> CorrelationId {
            self.id
        }
    }

    impl Response for GetValueResponse {
        fn correlation_id(&self) -> CorrelationId {
            self.id
        }
    }

    #[derive(Debug)]
    struct Noise(u32);

    #[tokio::test]
    async fn synchronous_responder_is_not_missed() {
        let bus = Bus::new();
        let _r = respond(&bus, "kv", |q: &GetValueQuery| {
            Ok(GetValueResponse {
                id: q.id,
                value: format!("value-of-{}", q.key),
            })
        });

        let resp = query(&bus, |id| GetValueQuery { id, key: "a" }, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.value, "value-of-a");
        assert_eq!(bus.subscriber_count::<GetValueResponse>(), 0);
    }

    #[tokio::test]
    async fn resolves_matching_response_among_unrelated_traffic() {
        let bus = Bus::new();
        let seen_query: Arc<Mutex<Option<CorrelationId>>> = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen_query);
        let _capture = bus.subscribe("capture", move |q: &GetValueQuery| {
            *s.lock().unwrap() = Some(q.id);
            Ok(())
        });

        let b = bus.clone();
        let seen = Arc::clone(&seen_query);
        let responder = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            let id = seen.lock().unwrap().unwrap();
            b.publish(Noise(1));
            b.publish(GetValueResponse {
                id: CorrelationId::new(),
                value: "stranger".into(),
            });
            b.publish(Noise(2));
            b.publish(GetValueResponse { id, value: "mine".into() });
            b.publish(GetValueResponse { id, value: "late duplicate".into() });
        });

        let resp = query(&bus, |id| GetValueQuery { id, key: "k" }, &CancellationToken::new())
            .await
            .unwrap();
        responder.await.unwrap();
        assert_eq!(resp.value, "mine");
    }

    #[tokio::test]
    async fn first_response_wins() {
        let bus = Bus::new();
        let _first = respond(&bus, "first", |q: &GetValueQuery| {
            Ok(GetValueResponse { id: q.id, value: "first".into() })
        });
        let _second = respond(&bus, "second", |q: &GetValueQuery| {
            Ok(GetValueResponse { id: q.id, value: "second".into() })
        });

        let resp = query(&bus, |id| GetValueQuery { id, key: "k" }, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.value, "first");
        assert_eq!(bus.fault_count(), 0);
    }

    #[tokio::test]
    async fn cancellation_leaves_no_subscription_behind() {
        let bus = Bus::new();
        let captured: Arc<Mutex<Option<CorrelationId>>> = Arc::new(Mutex::new(None));
        let c = Arc::clone(&captured);
        let _capture = bus.subscribe("capture", move |q: &GetValueQuery| {
            *c.lock().unwrap() = Some(q.id);
            Ok(())
        });

        let observed = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let res = query(&bus, |id| GetValueQuery { id, key: "k" }, &cancel).await;
        assert_eq!(res.unwrap_err(), QueryError::Canceled);
        assert_eq!(bus.subscriber_count::<GetValueResponse>(), 0);

        // A late response reaches nobody but an unrelated observer added afterwards.
        let o = Arc::clone(&observed);
        let _late_observer = bus.subscribe("late", move |_r: &GetValueResponse| {
            o.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let id = captured.lock().unwrap().unwrap();
        bus.publish(GetValueResponse { id, value: "too late".into() });
        assert_eq!(observed.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count::<GetValueResponse>(), 1);
    }

    #[tokio::test]
    async fn already_cancelled_token_fails_fast() {
        let bus = Bus::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res = query(&bus, |id| GetValueQuery { id, key: "k" }, &cancel).await;
        assert_eq!(res.unwrap_err(), QueryError::Canceled);
    }

    #[tokio::test]
    async fn response_in_hand_wins_over_cancelled_token() {
        let bus = Bus::new();
        let _r = respond(&bus, "kv", |q: &GetValueQuery| {
            Ok(GetValueResponse { id: q.id, value: "ready".into() })
        });
        let cancel = CancellationToken::new();
        cancel.cancel();

        for _ in 0..64 {
            let resp = query(&bus, |id| GetValueQuery { id, key: "k" }, &cancel)
                .await
                .unwrap();
            assert_eq!(resp.value, "ready");
        }
    }

    #[test]
    fn detached_responder_does_not_keep_bus_alive() {
        let bus = Bus::new();
        let weak = Arc::downgrade(&bus.inner);
        respond(&bus, "kv", |q: &GetValueQuery| {
            Ok(GetValueResponse { id: q.id, value: "v".into() })
        })
        .detach();

        drop(bus);
        assert!(weak.upgrade().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reports_timed_out() {
        let bus = Bus::new();
        let res = query_timeout(
            &bus,
            |id| GetValueQuery { id, key: "k" },
            &CancellationToken::new(),
            Duration::from_secs(3),
        )
        .await;
        assert_eq!(
            res.unwrap_err(),
            QueryError::TimedOut {
                timeout: Duration::from_secs(3)
            }
        );
        assert_eq!(bus.subscriber_count::<GetValueResponse>(), 0);
    }

    #[tokio::test]
    async fn failing_responder_is_a_handler_fault() {
        let bus = Bus::new();
        let _r = respond(&bus, "broken", |_q: &GetValueQuery| {
            Err(HandlerError::fail("backend down"))
        });
        let res = query_timeout(
            &bus,
            |id| GetValueQuery { id, key: "k" },
            &CancellationToken::new(),
            Duration::from_millis(50),
        )
        .await;
        assert!(matches!(res, Err(QueryError::TimedOut { .. })));
        assert_eq!(bus.fault_count(), 1);
    }
}
