use std::net::Ipv4Addr;

use crate::error::{Error, Result};

/// A half-open range of IPv4 addresses, `[start, stop)`.
///
/// Iteration increments the address by one, carrying from the last octet into
/// the previous ones (`10.0.0.255` is followed by `10.0.1.0`). The `stop`
/// address itself is never produced, so `start == stop` yields nothing.
///
/// The range is restartable: iterating `&range` does not consume it.
///
/// # Example
/// ```
/// use arp_conflict::range::AddressRange;
/// use std::net::Ipv4Addr;
///
/// let range = AddressRange::new(Ipv4Addr::new(10, 0, 0, 254), Ipv4Addr::new(10, 0, 1, 1)).unwrap();
/// let targets: Vec<_> = range.iter().collect();
/// assert_eq!(targets.len(), 3);
/// assert_eq!(targets[2], Ipv4Addr::new(10, 0, 1, 0));
/// ```
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct AddressRange {
    start: Ipv4Addr,
    stop: Ipv4Addr,
}

impl AddressRange {
    /// Creates a range, rejecting a `start` that lies above `stop`.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] when `start > stop`.
    pub fn new(start: Ipv4Addr, stop: Ipv4Addr) -> Result<Self> {
        if start > stop {
            return Err(Error::Configuration(format!(
                "start address {} lies beyond stop address {}",
                start, stop
            )));
        }
        Ok(Self { start, stop })
    }

    /// Creates a range without checking the bounds.
    ///
    /// If `start > stop` the iterator walks up to `255.255.255.255`, wraps to
    /// `0.0.0.0` and continues until it meets `stop`.
    pub fn unchecked(start: Ipv4Addr, stop: Ipv4Addr) -> Self {
        Self { start, stop }
    }

    pub fn start(&self) -> Ipv4Addr {
        self.start
    }

    pub fn stop(&self) -> Ipv4Addr {
        self.stop
    }

    pub fn len(&self) -> u64 {
        let start = u32::from(self.start);
        let stop = u32::from(self.stop);
        u64::from(stop.wrapping_sub(start))
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.stop
    }

    pub fn iter(&self) -> AddressIter {
        AddressIter {
            next: self.start,
            stop: self.stop,
        }
    }
}

impl IntoIterator for AddressRange {
    type Item = Ipv4Addr;
    type IntoIter = AddressIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for &AddressRange {
    type Item = Ipv4Addr;
    type IntoIter = AddressIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Clone, Debug)]
pub struct AddressIter {
    next: Ipv4Addr,
    stop: Ipv4Addr,
}

impl Iterator for AddressIter {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == self.stop {
            return None;
        }
        let current = self.next;
        self.next = increment(current);
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = u32::from(self.stop).wrapping_sub(u32::from(self.next));
        match usize::try_from(remaining) {
            Ok(remaining) => (remaining, Some(remaining)),
            Err(_) => (usize::MAX, None),
        }
    }
}

fn increment(ip: Ipv4Addr) -> Ipv4Addr {
    let mut octets = ip.octets();
    for octet in octets.iter_mut().rev() {
        if *octet == u8::MAX {
            *octet = 0;
        } else {
            *octet += 1;
            break;
        }
    }
    Ipv4Addr::from(octets)
}
