//! Select the rules of a flow table that a packet could hit.
//!
//! A rule is compatible with a [`MatchCondition`] when both its source and
//! its destination side are. A side is satisfied when the condition leaves it
//! open, when the rule does not constrain it, or when the condition's address
//! lies inside the rule's network. Both sides are always evaluated, so a
//! malformed network in either field is reported even when the other side
//! already rules the entry out.
use crate::flow::FlowEntry;
use crate::{Error, Result};
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// Source and destination a packet is matched with. Either side may be left
/// open.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MatchCondition {
    pub source: Option<Ipv4Addr>,
    pub dest: Option<Ipv4Addr>,
}

impl MatchCondition {
    #[must_use]
    pub fn new(source: Option<Ipv4Addr>, dest: Option<Ipv4Addr>) -> Self {
        Self { source, dest }
    }

    /// Build a condition from user input.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidAddress`] naming the offending text when
    /// either side is not an IPv4 address.
    pub fn parse(source: Option<&str>, dest: Option<&str>) -> Result<Self> {
        Ok(Self {
            source: source.map(parse_address).transpose()?,
            dest: dest.map(parse_address).transpose()?,
        })
    }

    /// Whether neither side is constrained.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.source.is_none() && self.dest.is_none()
    }

    /// Whether `entry` is compatible with this condition.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::MalformedFlow`] naming the switch when the entry's
    /// source or destination field is not a network.
    pub fn matches(&self, entry: &FlowEntry) -> Result<bool> {
        let source_match = side_matches(entry.switch(), entry.source(), self.source)?;
        let dest_match = side_matches(entry.switch(), entry.dest(), self.dest)?;
        Ok(source_match && dest_match)
    }
}

fn side_matches(switch: &str, field: Option<&str>, address: Option<Ipv4Addr>) -> Result<bool> {
    let Some(field) = field else {
        return Ok(true);
    };
    let network = parse_network(field).map_err(|_| Error::MalformedFlow {
        switch: switch.to_string(),
        text: field.to_string(),
    })?;
    Ok(address.map_or(true, |address| network.contains(&address)))
}

/// Filter `flows` down to the entries compatible with `condition`, in their
/// original order.
///
/// A missing table ([`None`], see [`parse_dump`](crate::flow::parse_dump))
/// stays missing, so "no table" is never confused with "nothing matched".
///
/// # Errors
///
/// Fails on the first entry whose source or destination field is malformed.
pub fn match_rules<'a>(
    flows: Option<&'a [FlowEntry]>,
    condition: &MatchCondition,
) -> Result<Option<Vec<&'a FlowEntry>>> {
    let Some(flows) = flows else {
        return Ok(None);
    };

    let mut matches = Vec::new();
    for flow in flows {
        if condition.matches(flow)? {
            matches.push(flow);
        }
    }
    Ok(Some(matches))
}

/// Parse a single IPv4 address.
///
/// # Errors
///
/// Fails with [`Error::InvalidAddress`] carrying the input.
pub fn parse_address(text: &str) -> Result<Ipv4Addr> {
    text.trim()
        .parse()
        .map_err(|_| Error::InvalidAddress(text.to_string()))
}

/// Parse a network as printed in a flow table: a bare address (an exact
/// match), `address/len`, or `address/mask` with a contiguous dotted mask.
/// Host bits below the prefix are ignored.
///
/// # Errors
///
/// Fails with [`Error::InvalidAddress`] carrying the input.
pub fn parse_network(text: &str) -> Result<Ipv4Net> {
    let invalid = || Error::InvalidAddress(text.to_string());

    let Some((address, mask)) = text.split_once('/') else {
        return parse_address(text).map(Ipv4Net::from);
    };
    let address: Ipv4Addr = address.parse().map_err(|_| invalid())?;
    let prefix_len = match mask.parse::<u8>() {
        Ok(len) => len,
        Err(_) => {
            let mask: Ipv4Addr = mask.parse().map_err(|_| invalid())?;
            ipnet::ipv4_mask_to_prefix(mask).map_err(|_| invalid())?
        }
    };
    Ipv4Net::new(address, prefix_len)
        .map(|net| net.trunc())
        .map_err(|_| invalid())
}
