//! Merged server statistics.

use crate::cluster::locator::Endpoint;
use std::collections::HashMap;

/// Statistic tables of every server that answered, keyed by endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerStats {
    servers: HashMap<Endpoint, HashMap<String, String>>,
}

impl ServerStats {
    pub(crate) fn insert(&mut self, endpoint: Endpoint, stats: HashMap<String, String>) {
        self.servers.insert(endpoint, stats);
    }

    /// Raw value of one statistic on one server.
    pub fn get(&self, endpoint: &Endpoint, name: &str) -> Option<&str> {
        self.servers.get(endpoint)?.get(name).map(String::as_str)
    }

    pub fn get_u64(&self, endpoint: &Endpoint, name: &str) -> Option<u64> {
        self.get(endpoint, name)?.parse().ok()
    }

    /// Sum of a numeric statistic across servers. Servers where it is missing
    /// or not a number are skipped.
    pub fn sum(&self, name: &str) -> u64 {
        self.servers
            .keys()
            .filter_map(|endpoint| self.get_u64(endpoint, name))
            .sum()
    }

    pub fn server(&self, endpoint: &Endpoint) -> Option<&HashMap<String, String>> {
        self.servers.get(endpoint)
    }

    pub fn servers(&self) -> impl Iterator<Item = &Endpoint> {
        self.servers.keys()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
