use std::{
    collections::{BTreeSet, HashMap},
    fs,
    path::Path,
    str::FromStr,
};

use pnet::util::MacAddr;

use crate::error::{Error, Result};

/// Resolves the organization a MAC address was assigned to.
pub trait VendorLookup {
    fn organization(&self, mac: MacAddr) -> Option<&str>;
}

/// Vendor table in Wireshark's `manuf` format.
///
/// Each line holds a prefix, a short name and an optional long name, separated
/// by tabs. Prefixes may carry a mask length (`00:1B:C5:00:00:00/36`); without
/// one the mask covers the bytes given. The longest matching prefix wins.
///
/// # Example
/// ```
/// use arp_conflict::vendor::{ManufTable, VendorLookup};
/// use pnet::util::MacAddr;
///
/// let table: ManufTable = "00:00:0C\tCisco\tCisco Systems, Inc\n".parse().unwrap();
/// let mac = MacAddr::new(0x00, 0x00, 0x0c, 0x12, 0x34, 0x56);
/// assert_eq!(table.organization(mac), Some("Cisco Systems, Inc"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct ManufTable {
    prefixes: HashMap<(u8, u64), String>,
    // mask lengths present in the table, tried longest first
    mask_lens: BTreeSet<u8>,
}

impl ManufTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a `manuf` file.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the file cannot be read or a line is malformed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| {
            Error::Configuration(format!("failed to read {}, reason: {}", path.display(), err))
        })?;
        text.parse()
    }

    pub fn insert(&mut self, prefix: u64, mask_len: u8, organization: &str) {
        let mask_len = mask_len.min(48);
        self.prefixes
            .insert((mask_len, prefix & mask(mask_len)), organization.into());
        self.mask_lens.insert(mask_len);
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

impl VendorLookup for ManufTable {
    fn organization(&self, mac: MacAddr) -> Option<&str> {
        let value = mac_to_u64(mac);
        self.mask_lens.iter().rev().find_map(|&mask_len| {
            self.prefixes
                .get(&(mask_len, value & mask(mask_len)))
                .map(String::as_str)
        })
    }
}

impl FromStr for ManufTable {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let mut table = Self::new();
        for (number, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split('\t').map(str::trim).filter(|f| !f.is_empty());
            let malformed = || Error::Configuration(format!("malformed manuf line {}", number + 1));
            let prefix = fields.next().ok_or_else(malformed)?;
            let short_name = fields.next().ok_or_else(malformed)?;
            let organization = fields.next().unwrap_or(short_name);
            let (prefix, mask_len) = parse_prefix(prefix).ok_or_else(malformed)?;
            table.insert(prefix, mask_len, organization);
        }
        Ok(table)
    }
}

fn parse_prefix(text: &str) -> Option<(u64, u8)> {
    let (bytes, mask_len) = match text.split_once('/') {
        Some((bytes, mask_len)) => (bytes, Some(mask_len.parse::<u8>().ok()?)),
        None => (text, None),
    };
    let octets = bytes
        .split([':', '-', '.'])
        .map(|octet| u8::from_str_radix(octet, 16).ok())
        .collect::<Option<Vec<_>>>()?;
    if octets.is_empty() || octets.len() > 6 {
        return None;
    }
    let value = octets
        .iter()
        .chain(std::iter::repeat(&0))
        .take(6)
        .fold(0u64, |acc, &octet| (acc << 8) | u64::from(octet));
    let mask_len = mask_len.unwrap_or(octets.len() as u8 * 8);
    (mask_len <= 48).then_some((value, mask_len))
}

fn mac_to_u64(mac: MacAddr) -> u64 {
    mac.octets()
        .iter()
        .fold(0u64, |acc, &octet| (acc << 8) | u64::from(octet))
}

fn mask(mask_len: u8) -> u64 {
    if mask_len == 0 {
        0
    } else {
        (u64::MAX << (48 - u32::from(mask_len))) & 0xFFFF_FFFF_FFFF
    }
}
