//! Caller-side failover loop.
//!
//! The routing core only picks URLs. This loop is the part of the proxy that
//! spends the per-service budget: it reports failed URLs, sleeps between
//! attempts and gives up with the last backend error once the budget is gone.

use std::future::Future;

use halyard_core::{HaRouter, HaServiceConfig};
use thiserror::Error;

/// How a failed backend call should be handled.
#[derive(Debug)]
pub enum DispatchFailure<E> {
    /// The backend looks down. Mark it failed and move to another URL.
    Failover(E),
    /// Transient error on a live backend. Try the same URL again.
    Retry(E),
    /// Not recoverable by retrying anywhere.
    Fatal(E),
}

/// Outcome of a dispatch that did not produce a response.
#[derive(Debug, Error)]
pub enum DispatchError<E> {
    /// Neither the router nor the static configuration had a URL.
    #[error("no backend URL available for service '{0}'")]
    NoBackend(String),
    /// The last backend error, surfaced unchanged.
    #[error("backend error: {0}")]
    Backend(E),
}

/// Sends a request for `service`, failing over between its candidates.
///
/// HA services get their URL from the router and spend the failover and
/// retry budgets of their [`HaServiceConfig`]. Services that are not HA
/// enabled, or whose policy is not registered, go to `direct_url` once.
pub async fn dispatch<T, E, F, Fut>(
    router: &HaRouter,
    service: &str,
    direct_url: Option<&str>,
    mut call: F,
) -> Result<T, DispatchError<E>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T, DispatchFailure<E>>>,
{
    let active = if router.is_ha_enabled(service) { router.get_active_url(service) } else { None };
    let ha = active.is_some();
    let budget = match router.service_config(service) {
        Some(config) if ha => config,
        _ => HaServiceConfig::disabled().with_max_failover_attempts(0).with_max_retry_attempts(0),
    };

    let Some(mut url) = active.or_else(|| direct_url.map(str::to_string)) else {
        return Err(DispatchError::NoBackend(service.to_string()));
    };

    let mut failovers = 0;
    let mut retries = 0;

    loop {
        let error = match call(url.clone()).await {
            Ok(response) => return Ok(response),
            Err(DispatchFailure::Fatal(error)) => return Err(DispatchError::Backend(error)),
            Err(DispatchFailure::Retry(error)) => {
                if retries >= budget.max_retry_attempts {
                    tracing::warn!(
                        service = %service,
                        url = %url,
                        retries,
                        "retry attempts exhausted"
                    );
                    return Err(DispatchError::Backend(error));
                }
                retries += 1;
                tracing::debug!(
                    service = %service,
                    url = %url,
                    attempt = retries,
                    "retrying request"
                );
                tokio::time::sleep(budget.retry_sleep()).await;
                continue;
            }
            Err(DispatchFailure::Failover(error)) => error,
        };

        if ha {
            router.mark_failed_url(service, &url);
        }
        if failovers >= budget.max_failover_attempts {
            tracing::warn!(
                service = %service,
                url = %url,
                failovers,
                "failover attempts exhausted"
            );
            return Err(DispatchError::Backend(error));
        }
        failovers += 1;
        tokio::time::sleep(budget.failover_sleep()).await;

        match router.get_active_url(service) {
            Some(next) => {
                tracing::info!(
                    service = %service,
                    from = %url,
                    to = %next,
                    attempt = failovers,
                    "failing over"
                );
                url = next;
            }
            None => return Err(DispatchError::Backend(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halyard_core::HaDescriptor;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const A: &str = "http://a:1";
    const B: &str = "http://b:1";
    const C: &str = "http://c:1";

    fn router(config: HaServiceConfig, urls: &[&str]) -> HaRouter {
        let descriptor = HaDescriptor::builder().service("svc", config).build();
        let router = HaRouter::new(descriptor);
        router.register_service("svc", urls.iter().map(|u| u.to_string()).collect()).unwrap();
        router
    }

    type Calls = Arc<Mutex<Vec<String>>>;

    /// Calls fail over for every URL in `down` and succeed elsewhere.
    fn backend(
        calls: &Calls,
        down: &'static [&'static str],
    ) -> impl FnMut(String) -> std::future::Ready<Result<String, DispatchFailure<String>>> {
        let calls = calls.clone();
        move |url: String| {
            calls.lock().unwrap().push(url.clone());
            let result = if down.iter().any(|d| *d == url) {
                Err(DispatchFailure::Failover(format!("{url} refused")))
            } else {
                Ok(url)
            };
            std::future::ready(result)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_over_to_next_candidate() {
        let router = router(HaServiceConfig::default().with_failover_sleep_millis(100), &[A, B, C]);
        let calls = Calls::default();

        let started = tokio::time::Instant::now();
        let served = dispatch(&router, "svc", None, backend(&calls, &[A])).await.unwrap();

        assert_eq!(served, B);
        assert_eq!(*calls.lock().unwrap(), vec![A.to_string(), B.to_string()]);
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(router.get_active_url("svc").as_deref(), Some(B));
    }

    #[tokio::test(start_paused = true)]
    async fn test_surfaces_last_backend_error_when_budget_exhausted() {
        let config = HaServiceConfig::default().with_max_failover_attempts(2);
        let router = router(config, &[A, B, C]);
        let calls = Calls::default();

        let err = dispatch(&router, "svc", None, backend(&calls, &[A, B, C])).await.unwrap_err();

        assert_eq!(calls.lock().unwrap().len(), 3);
        match err {
            DispatchError::Backend(message) => assert_eq!(message, format!("{C} refused")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_failover_budget_tries_once() {
        let config = HaServiceConfig::default().with_max_failover_attempts(0);
        let router = router(config, &[A, B]);
        let calls = Calls::default();

        assert!(dispatch(&router, "svc", None, backend(&calls, &[A])).await.is_err());
        assert_eq!(calls.lock().unwrap().len(), 1);
        // The failure is still recorded for the next request.
        assert_eq!(router.get_active_url("svc").as_deref(), Some(B));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_same_url_then_gives_up() {
        let config =
            HaServiceConfig::default().with_max_retry_attempts(2).with_retry_sleep_millis(10);
        let router = router(config, &[A, B]);
        let attempts = Arc::new(Mutex::new(Vec::new()));

        let recorded = attempts.clone();
        let result: Result<(), _> = dispatch(&router, "svc", None, move |url: String| {
            recorded.lock().unwrap().push(url);
            std::future::ready(Err(DispatchFailure::Retry("reset by peer")))
        })
        .await;

        assert!(matches!(result, Err(DispatchError::Backend("reset by peer"))));
        assert_eq!(*attempts.lock().unwrap(), vec![A.to_string(); 3]);
        assert_eq!(router.get_active_url("svc").as_deref(), Some(A));
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let router = router(HaServiceConfig::default(), &[A, B]);
        let calls = Arc::new(Mutex::new(0));

        let counter = calls.clone();
        let result: Result<(), _> = dispatch(&router, "svc", None, move |_url: String| {
            *counter.lock().unwrap() += 1;
            std::future::ready(Err(DispatchFailure::Fatal("bad request")))
        })
        .await;

        assert!(matches!(result, Err(DispatchError::Backend("bad request"))));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_non_ha_service_uses_direct_url() {
        let router = HaRouter::new(HaDescriptor::default());
        let calls = Calls::default();

        let served = dispatch(&router, "plain", Some(C), backend(&calls, &[])).await.unwrap();
        assert_eq!(served, C);

        let err = dispatch(&router, "plain", None, backend(&calls, &[])).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoBackend(name) if name == "plain"));

        assert!(dispatch(&router, "plain", Some(C), backend(&calls, &[C])).await.is_err());
        assert_eq!(calls.lock().unwrap().len(), 2);
    }
}
