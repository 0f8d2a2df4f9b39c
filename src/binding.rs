use std::{net::Ipv4Addr, time::SystemTime};

use pnet::util::MacAddr;
use tokio::sync::mpsc::UnboundedSender;

/// One observed ARP reply: `ip` is held by `mac`.
///
/// Every matching reply yields its own binding, so a host answering twice
/// within a window shows up twice.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ResolvedBinding {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub observed_at: SystemTime,
}

impl ResolvedBinding {
    pub fn new(ip: Ipv4Addr, mac: MacAddr) -> Self {
        Self {
            ip,
            mac,
            observed_at: SystemTime::now(),
        }
    }
}

/// Consumer of the bindings a scan emits, called in observation order.
pub trait BindingSink {
    fn emit(&mut self, binding: ResolvedBinding);
}

impl BindingSink for Vec<ResolvedBinding> {
    fn emit(&mut self, binding: ResolvedBinding) {
        self.push(binding);
    }
}

impl<S: BindingSink + ?Sized> BindingSink for &mut S {
    fn emit(&mut self, binding: ResolvedBinding) {
        (**self).emit(binding);
    }
}

/// Bindings are dropped once the receiving half is gone.
impl BindingSink for UnboundedSender<ResolvedBinding> {
    fn emit(&mut self, binding: ResolvedBinding) {
        if self.send(binding).is_err() {
            log::trace!("binding receiver dropped, discarding {}", binding.ip);
        }
    }
}
