//! # Master Discovery
//!
//! Purpose: Find the endpoint that currently accepts writes, given a fixed
//! roster, the last address known to be master, and an optional replication
//! hint learned from a replica.
//!
//! ## Design Principles
//! 1. **State Pattern**: Discovery is an explicit state machine so the order
//!    of attempts and the early exits can be audited and tested step by step.
//! 2. **At-Most-Once Dialing**: A visited set guarantees every address is
//!    dialed at most once per pass.
//! 3. **Cheap Common Case**: The last known master is tried first, then the
//!    upstream a replica pointed at, and only then the whole roster.
//! 4. **Local Recovery**: Dial and probe failures only move discovery to the
//!    next candidate; exhaustion is the single failure reported upward.
//!
//! ## States
//!
//! ```text
//! Start ─┬─> CheckingLastKnown ─┬─> Found
//!        │                      └─> CheckingHint ─┬─> Found
//!        ├──────────────────────────> CheckingHint │
//!        │                                        └─> ScanningRoster(i) ─┬─> Found
//!        └────────────────────────────────────────────> ScanningRoster(0)└─> Exhausted
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::connection::{Dialer, Link};
use crate::error::{ClientError, ClientResult};
use crate::role::{probe_role, ReplicationHint, Role};

/// Ordered, immutable list of candidate endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster(Arc<[String]>);

impl Roster {
    /// Builds a roster, trimming whitespace and dropping duplicates while
    /// keeping the declared order. An empty roster is rejected.
    pub fn new<I, S>(addrs: I) -> ClientResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let addrs: Vec<String> = addrs
            .into_iter()
            .map(|addr| addr.into().trim().to_string())
            .filter(|addr| !addr.is_empty() && seen.insert(addr.clone()))
            .collect();
        if addrs.is_empty() {
            return Err(ClientError::Config("roster is empty".to_string()));
        }
        Ok(Roster(addrs.into()))
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Position of a discovery pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Start,
    CheckingLastKnown,
    CheckingHint,
    /// Next roster index to consider.
    ScanningRoster(usize),
    Found,
    Exhausted,
}

/// A validated master link produced by discovery.
pub struct Discovered<L> {
    /// Address that reported master.
    pub addr: String,
    /// Open link to that address, already probed.
    pub link: L,
    /// Most recent replication hint seen during the pass.
    pub hint: Option<ReplicationHint>,
}

/// One discovery pass over a roster.
pub struct MasterDiscovery<'a, D: Dialer> {
    dialer: &'a D,
    roster: &'a [String],
    last_known: Option<&'a str>,
    hint: Option<ReplicationHint>,
    visited: HashSet<String>,
    state: DiscoveryState,
    found: Option<(String, D::Link)>,
}

impl<'a, D: Dialer> MasterDiscovery<'a, D> {
    pub fn new(
        dialer: &'a D,
        roster: &'a [String],
        last_known: Option<&'a str>,
        hint: Option<ReplicationHint>,
    ) -> Self {
        MasterDiscovery {
            dialer,
            roster,
            last_known: last_known.filter(|addr| !addr.is_empty()),
            hint,
            visited: HashSet::new(),
            state: DiscoveryState::Start,
            found: None,
        }
    }

    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    /// Addresses dialed so far in this pass.
    pub fn visited(&self) -> &HashSet<String> {
        &self.visited
    }

    /// Advances the state machine by one transition.
    pub fn step(&mut self) -> DiscoveryState {
        self.state = match self.state {
            DiscoveryState::Start => {
                if self.last_known.is_some() {
                    DiscoveryState::CheckingLastKnown
                } else {
                    self.after_last_known()
                }
            }
            DiscoveryState::CheckingLastKnown => {
                let addr = self.last_known.unwrap_or_default().to_string();
                if self.try_candidate(addr) {
                    DiscoveryState::Found
                } else {
                    self.after_last_known()
                }
            }
            DiscoveryState::CheckingHint => {
                let found = match self.hint.as_ref().map(ReplicationHint::address) {
                    Some(addr) => self.try_candidate(addr),
                    None => false,
                };
                if found {
                    DiscoveryState::Found
                } else {
                    DiscoveryState::ScanningRoster(0)
                }
            }
            DiscoveryState::ScanningRoster(idx) => match self.roster.get(idx).cloned() {
                None => DiscoveryState::Exhausted,
                Some(addr) => {
                    if self.try_candidate(addr) {
                        DiscoveryState::Found
                    } else {
                        DiscoveryState::ScanningRoster(idx + 1)
                    }
                }
            },
            terminal @ (DiscoveryState::Found | DiscoveryState::Exhausted) => terminal,
        };
        self.state
    }

    /// Runs until a master is found or every candidate was tried.
    pub fn run(mut self) -> Option<Discovered<D::Link>> {
        while !matches!(self.state, DiscoveryState::Found | DiscoveryState::Exhausted) {
            self.step();
        }
        let (addr, link) = self.found?;
        Some(Discovered {
            addr,
            link,
            hint: self.hint,
        })
    }

    fn after_last_known(&self) -> DiscoveryState {
        match &self.hint {
            Some(hint) if !self.visited.contains(&hint.address()) => DiscoveryState::CheckingHint,
            _ => DiscoveryState::ScanningRoster(0),
        }
    }

    /// Dials and probes `addr` unless it was already tried. True on master.
    fn try_candidate(&mut self, addr: String) -> bool {
        if !self.visited.insert(addr.clone()) {
            trace!(addr = %addr, "already tried");
            return false;
        }

        let mut link = match self.dialer.dial(&addr) {
            Ok(link) => link,
            Err(err) => {
                debug!(addr = %addr, error = %err, "dial failed");
                return false;
            }
        };

        match probe_role(&mut link) {
            Ok(Role::Master) => {
                self.found = Some((addr, link));
                true
            }
            Ok(role) => {
                debug!(addr = %addr, ?role, "candidate is not master");
                if let Some(hint) = role.hint() {
                    self.hint = Some(hint.clone());
                }
                link.terminate();
                false
            }
            Err(err) => {
                debug!(addr = %addr, error = %err, "role probe failed");
                link.terminate();
                false
            }
        }
    }
}

/// Finds a writable endpoint; `None` when no candidate reports master.
pub fn discover_master<D: Dialer>(
    dialer: &D,
    roster: &[String],
    last_known: Option<&str>,
    hint: Option<&ReplicationHint>,
) -> Option<Discovered<D::Link>> {
    MasterDiscovery::new(dialer, roster, last_known, hint.cloned()).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeDialer, FakeRole};

    fn roster(addrs: &[&str]) -> Vec<String> {
        addrs.iter().map(|addr| addr.to_string()).collect()
    }

    #[test]
    fn roster_keeps_order_and_drops_duplicates() {
        let roster = Roster::new([" a:1", "b:1", "a:1", "", "c:1"]).unwrap();
        assert_eq!(roster.as_slice(), &["a:1", "b:1", "c:1"]);
        assert!(Roster::new(Vec::<String>::new()).is_err());
    }

    #[test]
    fn finds_unique_master_at_any_position() {
        let addrs = roster(&["a:1", "b:1", "c:1", "d:1"]);
        for master in 0..addrs.len() {
            let dialer = FakeDialer::new();
            for (idx, addr) in addrs.iter().enumerate() {
                let role = if idx == master { FakeRole::Master } else { FakeRole::Replica(None) };
                dialer.set_role(addr, role);
            }
            let found = discover_master(&dialer, &addrs, None, None).expect("master");
            assert_eq!(found.addr, addrs[master]);
        }
    }

    #[test]
    fn exhausts_when_nobody_is_master() {
        let addrs = roster(&["a:1", "b:1", "c:1"]);
        let dialer = FakeDialer::new();
        dialer.set_role("a:1", FakeRole::Replica(Some(("c".to_string(), 1))));
        dialer.set_role("b:1", FakeRole::Down);
        dialer.set_role("c:1", FakeRole::Garbage);

        assert!(discover_master(&dialer, &addrs, Some("b:1"), None).is_none());
        for addr in &addrs {
            assert_eq!(dialer.dials(addr), 1, "{} dialed more than once", addr);
        }
        // Failed candidates are quit, not dropped.
        assert_eq!(dialer.terminated(), 2);
    }

    #[test]
    fn last_known_master_costs_one_round_trip() {
        let addrs = roster(&["a:1", "b:1", "c:1"]);
        let dialer = FakeDialer::new();
        dialer.set_role("a:1", FakeRole::Replica(None));
        dialer.set_role("b:1", FakeRole::Replica(None));
        dialer.set_role("c:1", FakeRole::Master);

        let found = discover_master(&dialer, &addrs, Some("c:1"), None).expect("master");
        assert_eq!(found.addr, "c:1");
        assert_eq!(dialer.round_trips(), 1);
        assert_eq!(dialer.dials("a:1"), 0);
    }

    #[test]
    fn hint_from_demoted_master_costs_two_round_trips() {
        let addrs = roster(&["a:1", "b:1", "c:1"]);
        let dialer = FakeDialer::new();
        dialer.set_role("a:1", FakeRole::Replica(None));
        dialer.set_role("b:1", FakeRole::Master);
        dialer.set_role("c:1", FakeRole::Replica(Some(("b".to_string(), 1))));

        let found = discover_master(&dialer, &addrs, Some("c:1"), None).expect("master");
        assert_eq!(found.addr, "b:1");
        assert_eq!(dialer.round_trips(), 2);
        assert_eq!(dialer.dials("a:1"), 0);
    }

    #[test]
    fn cached_hint_is_tried_before_roster() {
        let addrs = roster(&["a:1", "b:1", "c:1"]);
        let dialer = FakeDialer::new();
        dialer.set_role("a:1", FakeRole::Replica(None));
        dialer.set_role("b:1", FakeRole::Replica(None));
        dialer.set_role("c:1", FakeRole::Master);
        let hint = ReplicationHint {
            role: "slave".to_string(),
            host: "c".to_string(),
            port: 1,
        };

        let found = discover_master(&dialer, &addrs, None, Some(&hint)).expect("master");
        assert_eq!(found.addr, "c:1");
        assert_eq!(dialer.round_trips(), 1);
    }

    #[test]
    fn stale_hint_falls_back_to_scan_without_redialing() {
        let addrs = roster(&["a:1", "b:1", "c:1"]);
        let dialer = FakeDialer::new();
        dialer.set_role("a:1", FakeRole::Master);
        dialer.set_role("b:1", FakeRole::Down);
        dialer.set_role("c:1", FakeRole::Replica(Some(("b".to_string(), 1))));

        let found = discover_master(&dialer, &addrs, Some("c:1"), None).expect("master");
        assert_eq!(found.addr, "a:1");
        assert_eq!(dialer.dials("b:1"), 1);
        assert_eq!(dialer.dials("c:1"), 1);
    }

    #[test]
    fn walks_states_in_order() {
        let addrs = roster(&["a:1", "b:1"]);
        let dialer = FakeDialer::new();
        dialer.set_role("a:1", FakeRole::Replica(None));
        dialer.set_role("b:1", FakeRole::Master);

        let mut discovery = MasterDiscovery::new(&dialer, &addrs, Some("a:1"), None);
        assert_eq!(discovery.state(), DiscoveryState::Start);
        assert_eq!(discovery.step(), DiscoveryState::CheckingLastKnown);
        assert_eq!(discovery.step(), DiscoveryState::ScanningRoster(0));
        // a:1 already visited, so the scan moves on without dialing it again.
        assert_eq!(discovery.step(), DiscoveryState::ScanningRoster(1));
        assert_eq!(discovery.step(), DiscoveryState::Found);
        assert_eq!(discovery.step(), DiscoveryState::Found);
        assert_eq!(discovery.visited().len(), 2);
        assert_eq!(dialer.dials("a:1"), 1);
    }

    #[test]
    fn empty_last_known_is_ignored() {
        let addrs = roster(&["a:1"]);
        let dialer = FakeDialer::new();
        dialer.set_role("a:1", FakeRole::Master);
        let mut discovery = MasterDiscovery::new(&dialer, &addrs, Some(""), None);
        assert_eq!(discovery.step(), DiscoveryState::ScanningRoster(0));
    }

    #[test]
    fn failover_converges_within_one_pass() {
        let addrs = roster(&["a:1", "b:1", "c:1"]);
        let dialer = FakeDialer::new();
        dialer.set_role("a:1", FakeRole::Replica(Some(("c".to_string(), 1))));
        dialer.set_role("b:1", FakeRole::Replica(Some(("c".to_string(), 1))));
        dialer.set_role("c:1", FakeRole::Master);

        let first = discover_master(&dialer, &addrs, None, None).expect("master");
        assert_eq!(first.addr, "c:1");

        dialer.set_role("c:1", FakeRole::Replica(Some(("b".to_string(), 1))));
        dialer.set_role("a:1", FakeRole::Replica(Some(("b".to_string(), 1))));
        dialer.set_role("b:1", FakeRole::Master);
        dialer.reset_counters();

        let second =
            discover_master(&dialer, &addrs, Some(&first.addr), first.hint.as_ref()).expect("master");
        assert_eq!(second.addr, "b:1");
        assert_eq!(dialer.round_trips(), 2);
    }
}
