use std::sync::{Mutex, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, info};

use plend_ledger::{EventKind, LedgerEvent};
use plend_types::LoanId;

use crate::error::{FabricError, Result};
use crate::journal::EventJournal;

/// Filter for subscribing to a subset of ledger events.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    /// If set, only events of these kinds are delivered.
    pub kinds: Option<Vec<EventKind>>,
    /// If set, only events for these loans are delivered.
    pub loans: Option<Vec<LoanId>>,
    /// If set, only events with a greater `seq` are delivered.
    pub after_seq: Option<u64>,
}

impl EventFilter {
    pub fn kinds(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            kinds: Some(kinds.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn matches(&self, event: &LedgerEvent) -> bool {
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }
        if let Some(ref loans) = self.loans {
            if !loans.contains(&event.loan_id) {
                return false;
            }
        }
        if let Some(after) = self.after_seq {
            if event.seq <= after {
                return false;
            }
        }
        true
    }
}

/// A broadcast channel receiver for relayed events.
pub type EventStream = broadcast::Receiver<LedgerEvent>;

struct Subscriber {
    filter: EventFilter,
    sender: broadcast::Sender<LedgerEvent>,
}

/// Fan-out router that delivers events to matching subscribers.
struct EventRouter {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl EventRouter {
    fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    fn subscribe(&self, filter: EventFilter, capacity: usize) -> Result<EventStream> {
        let (sender, rx) = broadcast::channel(capacity);
        self.subscribers
            .write()
            .map_err(|_| FabricError::LockPoisoned("router"))?
            .push(Subscriber { filter, sender });
        Ok(rx)
    }

    /// Route an event to all matching subscribers, pruning closed channels.
    fn route(&self, event: &LedgerEvent) -> Result<()> {
        let mut subs = self
            .subscribers
            .write()
            .map_err(|_| FabricError::LockPoisoned("router"))?;
        subs.retain(|sub| {
            if sub.filter.matches(event) {
                sub.sender.send(event.clone()).is_ok()
            } else {
                sub.sender.receiver_count() > 0
            }
        });
        Ok(())
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.read().map(|subs| subs.len()).unwrap_or(0)
    }
}

/// Configuration for the [`EventRelay`].
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Capacity of per-subscriber broadcast channels.
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Carries ledger events to off-chain consumers.
///
/// Every published event is journaled (when a journal is attached) before it
/// is routed, and events at or below the last published `seq` are dropped,
/// so republishing an overlapping range after a restart is harmless.
pub struct EventRelay {
    journal: Option<EventJournal>,
    last_seq: Mutex<u64>,
    router: EventRouter,
    config: RelayConfig,
}

impl EventRelay {
    /// A relay without persistence.
    pub fn in_memory(config: RelayConfig) -> Self {
        Self {
            journal: None,
            last_seq: Mutex::new(0),
            router: EventRouter::new(),
            config,
        }
    }

    /// A relay that persists to `journal`.
    ///
    /// Call [`Self::recover`] before publishing so the relay knows where the
    /// journal ends.
    pub fn with_journal(journal: EventJournal, config: RelayConfig) -> Self {
        info!(journal = %journal.path().display(), "event relay started");
        Self {
            journal: Some(journal),
            last_seq: Mutex::new(0),
            router: EventRouter::new(),
            config,
        }
    }

    /// Replay the journal, returning its events and advancing the relay's
    /// cursor past them. Returns nothing for an in-memory relay.
    pub fn recover(&self) -> Result<Vec<LedgerEvent>> {
        let Some(journal) = &self.journal else {
            return Ok(Vec::new());
        };
        let events = journal.recover()?;
        let mut last = self
            .last_seq
            .lock()
            .map_err(|_| FabricError::LockPoisoned("relay cursor"))?;
        if let Some(tail) = events.last() {
            *last = (*last).max(tail.seq);
        }
        info!(count = events.len(), last_seq = *last, "recovered events from journal");
        Ok(events)
    }

    /// Journal and route one event. Returns `false` if it was already
    /// published.
    pub fn publish(&self, event: &LedgerEvent) -> Result<bool> {
        let mut last = self
            .last_seq
            .lock()
            .map_err(|_| FabricError::LockPoisoned("relay cursor"))?;
        if event.seq <= *last {
            debug!(seq = event.seq, last = *last, "event already relayed");
            return Ok(false);
        }

        if let Some(journal) = &self.journal {
            journal.append(event)?;
        }
        *last = event.seq;
        drop(last);

        self.router.route(event)?;
        debug!(%event, "event relayed");
        Ok(true)
    }

    pub fn subscribe(&self, filter: EventFilter) -> Result<EventStream> {
        self.router.subscribe(filter, self.config.channel_capacity)
    }

    /// Highest `seq` published or recovered, 0 if none.
    pub fn last_seq(&self) -> u64 {
        self.last_seq.lock().map(|last| *last).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.router.subscriber_count()
    }
}

#[cfg(test)]
mod tests {
    use plend_ledger::EventPayload;
    use plend_types::{Address, Commitment, Timestamp};

    use super::*;
    use crate::journal::SyncMode;

    fn submitted(seq: u64, loan: u64) -> LedgerEvent {
        LedgerEvent {
            seq,
            at: Timestamp::from_secs(seq),
            loan_id: LoanId::new(loan),
            payload: EventPayload::ApplicationSubmitted {
                commitment: Commitment::new(format!("c{seq}")).unwrap(),
                proof_hash: plend_types::ProofHash::derive(b"p"),
            },
        }
    }

    fn cancelled(seq: u64, loan: u64) -> LedgerEvent {
        LedgerEvent {
            seq,
            at: Timestamp::from_secs(seq),
            loan_id: LoanId::new(loan),
            payload: EventPayload::LoanOfferCancelled {
                lender: Address::derive("lender"),
            },
        }
    }

    #[test]
    fn subscriber_receives_matching_events() {
        let relay = EventRelay::in_memory(RelayConfig::default());
        let mut stream = relay
            .subscribe(EventFilter::kinds([EventKind::ApplicationSubmitted]))
            .unwrap();
        assert_eq!(relay.subscriber_count(), 1);

        relay.publish(&submitted(1, 1)).unwrap();
        relay.publish(&cancelled(2, 1)).unwrap();

        assert_eq!(stream.try_recv().unwrap().seq, 1);
        assert!(stream.try_recv().is_err());
    }

    #[test]
    fn loan_filter_narrows_delivery() {
        let relay = EventRelay::in_memory(RelayConfig::default());
        let mut stream = relay
            .subscribe(EventFilter {
                loans: Some(vec![LoanId::new(2)]),
                ..EventFilter::default()
            })
            .unwrap();

        relay.publish(&submitted(1, 1)).unwrap();
        relay.publish(&submitted(2, 2)).unwrap();

        assert_eq!(stream.try_recv().unwrap().loan_id, LoanId::new(2));
        assert!(stream.try_recv().is_err());
    }

    #[test]
    fn republished_events_are_dropped() {
        let relay = EventRelay::in_memory(RelayConfig::default());
        let mut stream = relay.subscribe(EventFilter::default()).unwrap();

        assert!(relay.publish(&submitted(1, 1)).unwrap());
        assert!(relay.publish(&submitted(2, 1)).unwrap());
        assert!(!relay.publish(&submitted(2, 1)).unwrap());
        assert!(!relay.publish(&submitted(1, 1)).unwrap());
        assert_eq!(relay.last_seq(), 2);

        assert_eq!(stream.try_recv().unwrap().seq, 1);
        assert_eq!(stream.try_recv().unwrap().seq, 2);
        assert!(stream.try_recv().is_err());
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let relay = EventRelay::in_memory(RelayConfig::default());
        let stream = relay.subscribe(EventFilter::default()).unwrap();
        drop(stream);
        relay.publish(&submitted(1, 1)).unwrap();
        assert_eq!(relay.subscriber_count(), 0);
    }

    #[test]
    fn journal_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.journal");

        let relay = EventRelay::with_journal(
            EventJournal::open(&path, SyncMode::OsDefault).unwrap(),
            RelayConfig::default(),
        );
        relay.recover().unwrap();
        relay.publish(&submitted(1, 1)).unwrap();
        relay.publish(&cancelled(2, 3)).unwrap();
        drop(relay);

        let restarted = EventRelay::with_journal(
            EventJournal::open(&path, SyncMode::OsDefault).unwrap(),
            RelayConfig::default(),
        );
        let replayed = restarted.recover().unwrap();
        assert_eq!(replayed, vec![submitted(1, 1), cancelled(2, 3)]);
        assert_eq!(restarted.last_seq(), 2);
        assert!(!restarted.publish(&cancelled(2, 3)).unwrap());
        assert!(restarted.publish(&submitted(3, 1)).unwrap());
    }

    #[test]
    fn filter_after_seq() {
        let filter = EventFilter {
            after_seq: Some(5),
            ..EventFilter::default()
        };
        assert!(!filter.matches(&submitted(5, 1)));
        assert!(filter.matches(&submitted(6, 1)));
        assert!(EventFilter::default().matches(&cancelled(1, 1)));
    }
}
