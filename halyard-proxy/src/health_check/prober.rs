//! Background prober for active TCP health checks.
//!
//! The prober is the out-of-band recovery signal for HA services: when the
//! active URL of a service stops accepting connections it is marked failed
//! and the first reachable candidate is made active explicitly, before the
//! next client request has to discover the outage itself.
//!
//! It also re-admits leaders: a published leader that the request path
//! reported failed is made active again as soon as it accepts connections.

use std::sync::Arc;
use std::time::Duration;

use halyard_core::{HaRouter, LeaderBoard, LeaderDiscovery};
use hyper::Uri;
use tokio::net::TcpStream;
use tokio::time;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(1500);

/// What a probe round changed for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The active URL answered.
    Healthy,
    /// The active URL was down and traffic moved to another candidate.
    Switched {
        /// The unreachable URL.
        from: String,
        /// The reachable candidate now active.
        to: String,
    },
    /// The active URL was down and no candidate answered.
    AllDown,
    /// The service is not registered or has no candidates.
    Skipped,
}

/// Spawns a background Tokio task that periodically probes every registered
/// HA service and steers its active URL away from unreachable backends.
pub fn spawn_health_checker(
    router: Arc<HaRouter>,
    boards: Vec<Arc<LeaderBoard>>,
    interval_ms: u64,
) {
    let check_interval = Duration::from_millis(interval_ms);

    tokio::spawn(async move {
        let mut interval = time::interval(check_interval);

        // Prevent immediately ticking when spawned
        interval.tick().await;

        loop {
            interval.tick().await;

            for board in &boards {
                for service in recover_leaders(&router, board, CONNECT_TIMEOUT).await {
                    tracing::info!(service = %service, "health check re-admitted leader");
                }
            }

            for service in router.registered_services() {
                let outcome = probe_service(&router, &service, CONNECT_TIMEOUT).await;
                if let ProbeOutcome::Switched { from, to } = &outcome {
                    tracing::warn!(
                        service = %service,
                        from = %from,
                        to = %to,
                        "health check moved active URL"
                    );
                } else if outcome == ProbeOutcome::AllDown {
                    tracing::error!(
                        service = %service,
                        "health check found no reachable candidate"
                    );
                }
            }
        }
    });
}

/// Runs one probe round for `service`.
pub async fn probe_service(router: &HaRouter, service: &str, timeout: Duration) -> ProbeOutcome {
    let (Some(active), Some(candidates)) =
        (router.get_active_url(service), router.candidate_urls(service))
    else {
        return ProbeOutcome::Skipped;
    };

    if is_reachable(&active, timeout).await {
        return ProbeOutcome::Healthy;
    }
    router.mark_failed_url(service, &active);

    for candidate in candidates.iter().filter(|c| **c != active) {
        if is_reachable(candidate, timeout).await {
            return match router.set_active_url(service, candidate) {
                Ok(()) => ProbeOutcome::Switched { from: active, to: candidate.clone() },
                // Re-registered with different candidates mid-probe.
                Err(_) => ProbeOutcome::Skipped,
            };
        }
    }
    ProbeOutcome::AllDown
}

/// Re-admits published leaders that were reported failed and answer again.
///
/// Reports for leaders that are still down stay queued for the next round.
/// Reports superseded by a newly published leader are dropped. Returns the
/// services whose leader was made active again.
pub async fn recover_leaders(
    router: &HaRouter,
    board: &LeaderBoard,
    timeout: Duration,
) -> Vec<String> {
    let mut recovered = Vec::new();

    for (service, failed_url) in board.take_refresh_requests() {
        if board.leader(&service).as_deref() != Some(failed_url.as_str())
            || !router.is_registered(&service)
        {
            continue;
        }
        if !is_reachable(&failed_url, timeout).await {
            board.request_refresh(&service, &failed_url);
            continue;
        }
        if router.set_active_url(&service, &failed_url).is_ok() {
            recovered.push(service);
        }
    }
    recovered
}

/// Attempts a TCP connect to the URL's host and port.
async fn is_reachable(url: &str, timeout: Duration) -> bool {
    let Some((host, port)) = socket_target(url) else {
        tracing::debug!(url = %url, "cannot derive probe target from URL");
        return false;
    };
    // Perform a simple and fast TCP connect to check health
    let connect = TcpStream::connect((host.as_str(), port));
    matches!(time::timeout(timeout, connect).await, Ok(Ok(_)))
}

fn socket_target(url: &str) -> Option<(String, u16)> {
    let uri: Uri = url.parse().ok()?;
    let host = uri.host()?.trim_start_matches('[').trim_end_matches(']').to_string();
    let port = match (uri.port_u16(), uri.scheme_str()) {
        (Some(port), _) => port,
        (None, Some("https" | "wss")) => 443,
        (None, _) => 80,
    };
    Some((host, port))
}
