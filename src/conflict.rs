use std::{collections::HashMap, net::Ipv4Addr};

use pnet::util::MacAddr;

use crate::binding::{BindingSink, ResolvedBinding};

/// Distinct MAC addresses seen for every IP, in first-seen order.
///
/// An IP is in conflict once more than one MAC has answered for it.
///
/// # Example
/// ```
/// use arp_conflict::{binding::ResolvedBinding, conflict::ConflictAggregator};
/// use pnet::util::MacAddr;
/// use std::net::Ipv4Addr;
///
/// let ip = Ipv4Addr::new(10, 0, 0, 5);
/// let mut aggregator = ConflictAggregator::new();
/// aggregator.record(ResolvedBinding::new(ip, MacAddr::new(0, 0, 0, 0, 0, 1)));
/// aggregator.record(ResolvedBinding::new(ip, MacAddr::new(0, 0, 0, 0, 0, 2)));
/// assert_eq!(aggregator.conflicts().count(), 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct ConflictAggregator {
    entries: Vec<(Ipv4Addr, Vec<MacAddr>)>,
    index: HashMap<Ipv4Addr, usize>,
}

impl ConflictAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the binding's MAC to the set for its IP. Repeated pairs are ignored.
    pub fn record(&mut self, binding: ResolvedBinding) {
        let position = *self.index.entry(binding.ip).or_insert_with(|| {
            self.entries.push((binding.ip, Vec::new()));
            self.entries.len() - 1
        });
        let macs = &mut self.entries[position].1;
        if !macs.contains(&binding.mac) {
            macs.push(binding.mac);
        }
    }

    /// MACs seen for `ip`, if any reply for it was recorded.
    pub fn get(&self, ip: &Ipv4Addr) -> Option<&[MacAddr]> {
        self.index
            .get(ip)
            .map(|&position| self.entries[position].1.as_slice())
    }

    /// Every recorded IP with its MACs, conflicting or not.
    pub fn iter(&self) -> impl Iterator<Item = (Ipv4Addr, &[MacAddr])> {
        self.entries.iter().map(|(ip, macs)| (*ip, macs.as_slice()))
    }

    pub fn conflicts(&self) -> impl Iterator<Item = (Ipv4Addr, &[MacAddr])> {
        self.iter().filter(|(_, macs)| macs.len() > 1)
    }

    pub fn has_conflicts(&self) -> bool {
        self.conflicts().next().is_some()
    }

    /// Number of distinct IPs recorded.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl BindingSink for ConflictAggregator {
    fn emit(&mut self, binding: ResolvedBinding) {
        self.record(binding);
    }
}

impl Extend<ResolvedBinding> for ConflictAggregator {
    fn extend<T: IntoIterator<Item = ResolvedBinding>>(&mut self, iter: T) {
        for binding in iter {
            self.record(binding);
        }
    }
}

impl FromIterator<ResolvedBinding> for ConflictAggregator {
    fn from_iter<T: IntoIterator<Item = ResolvedBinding>>(iter: T) -> Self {
        let mut aggregator = Self::new();
        aggregator.extend(iter);
        aggregator
    }
}
