// Copyright 2020 Joyent, Inc.

use std::collections::HashSet;

use arc_swap::ArcSwap;
use rand::Rng;

use crate::endpoint::Endpoint;
use crate::error::Error;

/// The set of candidate endpoints together with the endpoints currently
/// excluded from selection. Snapshots are immutable: a mutation builds a new
/// state and swaps it in whole, so a reader never observes a partial update.
#[derive(Clone, Debug, Default)]
pub struct RoutingState {
    hosts: HashSet<Endpoint>,
    blacklist: HashSet<Endpoint>,
}

impl RoutingState {
    /// The endpoints known to the policy, blacklisted or not.
    pub fn hosts(&self) -> &HashSet<Endpoint> {
        &self.hosts
    }

    /// The endpoints currently excluded from selection. A blacklisted
    /// address may or may not still be in the configured set.
    pub fn blacklist(&self) -> &HashSet<Endpoint> {
        &self.blacklist
    }
}

/// The routing policy seam: owns the candidate endpoint set and decides which
/// endpoint each attempt runs against.
///
/// Implementations must be safe under concurrent invocation from multiple
/// threads. Mutations must be atomic with respect to each other so that
/// concurrent `add_host`/`remove_host`/`blacklist` calls never lose an
/// update.
pub trait Router: Send + Sync {
    /// Return an endpoint that is not currently blacklisted, or `None` if
    /// every known endpoint is blacklisted or none are configured.
    fn select_host(&self) -> Option<Endpoint>;

    /// Add an endpoint to the candidate set.
    fn add_host(&self, endpoint: Endpoint);

    /// Remove an endpoint from the candidate set and from the blacklist.
    /// This is the only way an endpoint leaves the default policy's
    /// blacklist.
    fn remove_host(&self, endpoint: &Endpoint);

    /// Mark an endpoint as unusable. The base contract is
    /// permanent-until-explicit-removal; implementations may layer TTL-based
    /// expiry on top.
    fn blacklist(&self, endpoint: &Endpoint);

    /// Whether the endpoint is currently excluded from selection.
    fn is_blacklisted(&self, endpoint: &Endpoint) -> bool;

    /// Notification hook invoked after every failed attempt against
    /// `endpoint`, after the driver has already blacklisted it. The default
    /// implementation does nothing; implementations that track error rates
    /// may override it.
    fn on_error(&self, _endpoint: &Endpoint, _cause: &Error) {}

    /// The set of endpoints currently known to the policy, blacklisted or
    /// not.
    fn hosts(&self) -> HashSet<Endpoint>;
}

/// The default routing policy: uniform-random choice among non-blacklisted
/// endpoints, with blacklist entries held until an explicit `remove_host`.
///
/// State lives behind an `ArcSwap`. Reads are lock-free loads of the current
/// snapshot; every mutation is a read-compute-commit cycle that retries on
/// conflict.
#[derive(Debug, Default)]
pub struct RandomRouter {
    state: ArcSwap<RoutingState>,
}

impl RandomRouter {
    /// Return a new instance of `RandomRouter` seeded with the given
    /// endpoints and an empty blacklist.
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        let state = RoutingState {
            hosts: endpoints.into_iter().collect(),
            blacklist: HashSet::new(),
        };
        RandomRouter {
            state: ArcSwap::from_pointee(state),
        }
    }

    /// A snapshot of the full routing state.
    pub fn state(&self) -> RoutingState {
        RoutingState::clone(&self.state.load())
    }

    fn update<F>(&self, mutate: F)
    where
        F: Fn(&mut RoutingState),
    {
        self.state.rcu(|current| {
            let mut next = RoutingState::clone(current);
            mutate(&mut next);
            next
        });
    }
}

impl Router for RandomRouter {
    fn select_host(&self) -> Option<Endpoint> {
        let state = self.state.load();
        let candidates: Vec<&Endpoint> = state
            .hosts
            .iter()
            .filter(|h| !state.blacklist.contains(*h))
            .collect();

        if candidates.is_empty() {
            None
        } else {
            let idx = rand::thread_rng().gen_range(0..candidates.len());
            Some(candidates[idx].clone())
        }
    }

    fn add_host(&self, endpoint: Endpoint) {
        self.update(|state| {
            state.hosts.insert(endpoint.clone());
        });
    }

    fn remove_host(&self, endpoint: &Endpoint) {
        self.update(|state| {
            state.hosts.remove(endpoint);
            state.blacklist.remove(endpoint);
        });
    }

    fn blacklist(&self, endpoint: &Endpoint) {
        self.update(|state| {
            state.blacklist.insert(endpoint.clone());
        });
    }

    fn is_blacklisted(&self, endpoint: &Endpoint) -> bool {
        self.state.load().blacklist.contains(endpoint)
    }

    fn hosts(&self) -> HashSet<Endpoint> {
        self.state.load().hosts.clone()
    }
}
