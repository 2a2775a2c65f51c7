//! Query/response correlation for `<iq/>` stanzas.

use std::collections::BTreeMap;
use std::time::Duration;

use minidom::Element;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::error::IqError;

pub type IqResult = Result<Element, IqError>;

/// One-shot continuation for an outstanding query.
pub type Responder = oneshot::Sender<IqResult>;

struct PendingRequest {
    responder: Responder,
    sent_at: Instant,
}

/// Assigns request ids and hands responses back to the caller that asked.
///
/// Ids come from a counter that starts at zero and is never reset or reused
/// for the lifetime of the correlator.
pub struct IqCorrelator {
    next_id: u64,
    pending: BTreeMap<u64, PendingRequest>,
    timeout: Option<Duration>,
}

impl IqCorrelator {
    /// `timeout` of `None` keeps unanswered queries pending forever.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            next_id: 0,
            pending: BTreeMap::new(),
            timeout,
        }
    }

    /// Stamp the next id onto `query` and record its continuation.
    ///
    /// Returns the id and the stanza to transmit.
    pub fn register(&mut self, mut query: Element, responder: Responder) -> (u64, Element) {
        let id = self.next_id;
        self.next_id += 1;

        query.set_attr("id", id.to_string());
        self.pending.insert(
            id,
            PendingRequest {
                responder,
                sent_at: Instant::now(),
            },
        );
        (id, query)
    }

    /// Resolve the pending request whose id matches `response`.
    ///
    /// Returns `false` when no request is waiting for that id; the response
    /// is dropped in that case.
    pub fn on_response(&mut self, response: Element) -> bool {
        let Some(id) = response.attr("id").and_then(|id| id.parse::<u64>().ok()) else {
            debug!(id = ?response.attr("id"), "dropping iq response with foreign id");
            return false;
        };

        let Some(pending) = self.pending.remove(&id) else {
            debug!(id, "dropping iq response with no pending request");
            return false;
        };

        // The caller may have stopped waiting; that is not an error here.
        let _ = pending.responder.send(Ok(response));
        true
    }

    /// Fail and remove every request older than the timeout.
    pub fn expire(&mut self, now: Instant) -> usize {
        let Some(timeout) = self.timeout else {
            return 0;
        };

        let expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, pending)| now.saturating_duration_since(pending.sent_at) >= timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            if let Some(pending) = self.pending.remove(id) {
                debug!(id, "iq request timed out");
                let _ = pending.responder.send(Err(IqError::Timeout {
                    id: *id,
                    timeout_seconds: timeout.as_secs(),
                }));
            }
        }
        expired.len()
    }

    /// Fail every outstanding request; used on session teardown.
    pub fn fail_all(&mut self) {
        for (id, pending) in std::mem::take(&mut self.pending) {
            let _ = pending.responder.send(Err(IqError::Disconnected { id }));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stanza::NS_CLIENT;
    use assert_matches::assert_matches;
    use tracing_test::traced_test;

    fn query() -> Element {
        Element::builder("iq", NS_CLIENT).attr("type", "get").build()
    }

    fn result(id: &str) -> Element {
        Element::builder("iq", NS_CLIENT)
            .attr("type", "result")
            .attr("id", id)
            .build()
    }

    #[test]
    fn ids_are_unique_and_strictly_increasing() {
        let mut correlator = IqCorrelator::new(None);
        let mut receivers = Vec::new();
        let mut ids = Vec::new();

        for _ in 0..5 {
            let (tx, rx) = oneshot::channel();
            let (id, stamped) = correlator.register(query(), tx);
            assert_eq!(stamped.attr("id"), Some(id.to_string().as_str()));
            ids.push(id);
            receivers.push(rx);
        }

        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(correlator.pending_count(), 5);
    }

    #[test]
    fn responses_in_any_order_reach_their_own_caller() {
        let mut correlator = IqCorrelator::new(None);
        let (tx0, mut rx0) = oneshot::channel();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        correlator.register(query(), tx0);
        correlator.register(query(), tx1);
        correlator.register(query(), tx2);

        assert!(correlator.on_response(result("2")));
        assert!(rx0.try_recv().is_err());
        assert!(rx1.try_recv().is_err());
        let answered = rx2.try_recv().unwrap().unwrap();
        assert_eq!(answered.attr("id"), Some("2"));

        assert!(correlator.on_response(result("0")));
        assert_eq!(rx0.try_recv().unwrap().unwrap().attr("id"), Some("0"));
        assert!(rx1.try_recv().is_err());
        assert!(correlator.is_pending(1));
        assert!(!correlator.is_pending(0));
    }

    #[test]
    fn duplicate_response_is_ignored() {
        let mut correlator = IqCorrelator::new(None);
        let (tx, _rx) = oneshot::channel();
        correlator.register(query(), tx);

        assert!(correlator.on_response(result("0")));
        assert!(!correlator.on_response(result("0")));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn unknown_or_malformed_ids_are_dropped() {
        let mut correlator = IqCorrelator::new(None);
        let (tx, mut rx) = oneshot::channel();
        correlator.register(query(), tx);

        assert!(!correlator.on_response(result("7")));
        assert!(!correlator.on_response(result("carbons-enable")));
        assert!(!correlator.on_response(Element::builder("iq", NS_CLIENT).build()));
        assert!(rx.try_recv().is_err());
        assert!(correlator.is_pending(0));
    }

    #[test]
    #[traced_test]
    fn stray_response_is_logged_at_debug() {
        let mut correlator = IqCorrelator::new(None);
        assert!(!correlator.on_response(result("3")));
        assert!(logs_contain("dropping iq response with no pending request"));
    }

    #[test]
    fn ids_are_not_reused_after_resolution() {
        let mut correlator = IqCorrelator::new(None);
        let (tx, _rx) = oneshot::channel();
        let (first, _) = correlator.register(query(), tx);
        correlator.on_response(result("0"));

        let (tx, _rx) = oneshot::channel();
        let (second, _) = correlator.register(query(), tx);
        assert!(second > first);
    }

    #[tokio::test(start_paused = true)]
    async fn expire_fails_only_stale_requests() {
        let mut correlator = IqCorrelator::new(Some(Duration::from_secs(30)));
        let (tx_old, mut rx_old) = oneshot::channel();
        correlator.register(query(), tx_old);

        tokio::time::advance(Duration::from_secs(20)).await;
        let (tx_new, mut rx_new) = oneshot::channel();
        correlator.register(query(), tx_new);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(correlator.expire(Instant::now()), 1);

        assert_matches!(
            rx_old.try_recv(),
            Ok(Err(IqError::Timeout { id: 0, timeout_seconds: 30 }))
        );
        assert!(rx_new.try_recv().is_err());
        assert!(correlator.is_pending(1));

        // A late answer to the expired query is dropped like any stray.
        assert!(!correlator.on_response(result("0")));
    }

    #[tokio::test(start_paused = true)]
    async fn expire_is_a_no_op_without_timeout() {
        let mut correlator = IqCorrelator::new(None);
        let (tx, _rx) = oneshot::channel();
        correlator.register(query(), tx);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(correlator.expire(Instant::now()), 0);
        assert_eq!(correlator.pending_count(), 1);
    }

    #[test]
    fn fail_all_reports_disconnect_to_every_caller() {
        let mut correlator = IqCorrelator::new(None);
        let (tx0, mut rx0) = oneshot::channel();
        let (tx1, mut rx1) = oneshot::channel();
        correlator.register(query(), tx0);
        correlator.register(query(), tx1);

        correlator.fail_all();

        assert_matches!(rx0.try_recv(), Ok(Err(IqError::Disconnected { id: 0 })));
        assert_matches!(rx1.try_recv(), Ok(Err(IqError::Disconnected { id: 1 })));
        assert_eq!(correlator.pending_count(), 0);
    }
}
