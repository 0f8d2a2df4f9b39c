//! ## Example
//! Following example demonstrates sweeping an address range for IPs that are answered by more than one MAC address.
//! To run this example locally, make sure to specify the network interface (e.g., `eth0` or `wlan0`) and the range as parameters.
//! ```no_run
#![doc = include_str!("../demos/scan.rs")]
//! ```
//! Targets are queried one after another; every reply seen for the target being queried is handed to a
//! [`binding::BindingSink`], such as [`conflict::ConflictAggregator`].

pub mod binding;
pub mod conflict;
pub mod error;
pub mod frame;
pub mod interface;
pub mod range;
pub mod resolver;
pub mod session;
pub mod vendor;

pub(crate) mod constants;

pub use binding::{BindingSink, ResolvedBinding};
pub use conflict::ConflictAggregator;
pub use error::{Error, Result};
pub use frame::RequestFrame;
pub use interface::LocalInterface;
pub use range::AddressRange;
pub use resolver::{Resolver, ResolverConfig, ResolverConfigBuilder, ScanSummary};
pub use session::{AfPacketSession, CaptureFilter, LocalAddrs, Session};
pub use vendor::{ManufTable, VendorLookup};
