//! Key layout of every store region
//!
//! | region | key |
//! |--------|-----|
//! | stream records | `account` |
//! | flows | `from ‖ to` |
//! | out-flows | `payer ‖ status ‖ counterparty` |
//! | auto-settle | `timestamp(BE) ‖ account` |
//! | prices | `time(BE)` |
//!
//! Timestamps are encoded big-endian so byte order equals numeric order.
//! Negative timestamps never reach the index and clamp to zero.

use crate::{
    error::{Error, Result},
    storage::Region,
    types::{Address, AutoSettleRecord, OutFlowStatus},
};

const TS_LEN: usize = 8;

/// Key of a stream record
pub fn stream_record_key(account: &Address) -> Vec<u8> {
    account.as_bytes().to_vec()
}

/// Key of a flow edge
pub fn flow_key(from: &Address, to: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(Address::LEN * 2);
    key.extend_from_slice(from.as_bytes());
    key.extend_from_slice(to.as_bytes());
    key
}

/// Prefix of every flow paid by `from`
pub fn flow_prefix(from: &Address) -> Vec<u8> {
    from.as_bytes().to_vec()
}

/// Split a flow key into (from, to)
pub fn parse_flow_key(key: &[u8]) -> Result<(Address, Address)> {
    if key.len() != Address::LEN * 2 {
        return Err(malformed(Region::Flow, format!("length {}", key.len())));
    }
    let (from, to) = key.split_at(Address::LEN);
    Ok((address(Region::Flow, from)?, address(Region::Flow, to)?))
}

/// Key of an out-flow entry
pub fn out_flow_key(payer: &Address, status: OutFlowStatus, to: &Address) -> Vec<u8> {
    let mut key = out_flow_status_prefix(payer, status);
    key.extend_from_slice(to.as_bytes());
    key
}

/// Prefix of a payer's out-flows with the given status
pub fn out_flow_status_prefix(payer: &Address, status: OutFlowStatus) -> Vec<u8> {
    let mut key = Vec::with_capacity(Address::LEN * 2 + 1);
    key.extend_from_slice(payer.as_bytes());
    key.push(status.as_byte());
    key
}

/// Split an out-flow key into (payer, status, counterparty)
pub fn parse_out_flow_key(key: &[u8]) -> Result<(Address, OutFlowStatus, Address)> {
    if key.len() != Address::LEN * 2 + 1 {
        return Err(malformed(Region::OutFlow, format!("length {}", key.len())));
    }
    let payer = address(Region::OutFlow, &key[..Address::LEN])?;
    let status = OutFlowStatus::from_byte(key[Address::LEN])
        .ok_or_else(|| malformed(Region::OutFlow, format!("status byte {}", key[Address::LEN])))?;
    let to = address(Region::OutFlow, &key[Address::LEN + 1..])?;
    Ok((payer, status, to))
}

/// Key of an auto-settle index entry
pub fn auto_settle_key(timestamp: i64, addr: &Address) -> Vec<u8> {
    let mut key = timestamp_bytes(timestamp).to_vec();
    key.extend_from_slice(addr.as_bytes());
    key
}

/// Exclusive upper bound covering every entry with `timestamp <= ts`
pub fn auto_settle_upper_bound(ts: i64) -> Vec<u8> {
    timestamp_bytes(ts.saturating_add(1)).to_vec()
}

/// Decode an auto-settle index key
pub fn parse_auto_settle_key(key: &[u8]) -> Result<AutoSettleRecord> {
    if key.len() != TS_LEN + Address::LEN {
        return Err(malformed(Region::AutoSettle, format!("length {}", key.len())));
    }
    let (ts, addr) = key.split_at(TS_LEN);
    Ok(AutoSettleRecord {
        timestamp: parse_timestamp(Region::AutoSettle, ts)?,
        addr: address(Region::AutoSettle, addr)?,
    })
}

/// Key of a price point
pub fn price_key(time: i64) -> Vec<u8> {
    timestamp_bytes(time).to_vec()
}

/// Exclusive upper bound covering every price with `time <= t`
pub fn price_upper_bound(t: i64) -> Vec<u8> {
    timestamp_bytes(t.saturating_add(1)).to_vec()
}

/// Smallest key strictly greater than every key starting with `prefix`
///
/// `None` when the prefix is all `0xff` (scan to the end of the region).
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

fn timestamp_bytes(ts: i64) -> [u8; TS_LEN] {
    (ts.max(0) as u64).to_be_bytes()
}

fn parse_timestamp(region: Region, bytes: &[u8]) -> Result<i64> {
    let bytes: [u8; TS_LEN] = bytes
        .try_into()
        .map_err(|_| malformed(region, "timestamp width".to_string()))?;
    i64::try_from(u64::from_be_bytes(bytes))
        .map_err(|_| malformed(region, "timestamp out of range".to_string()))
}

fn address(region: Region, bytes: &[u8]) -> Result<Address> {
    Address::from_slice(bytes).ok_or_else(|| malformed(region, "address width".to_string()))
}

fn malformed(region: Region, reason: String) -> Error {
    Error::MalformedKey {
        region: region.name(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_settle_key_orders_by_time_then_account() {
        let a = Address::new([9; 20]);
        let b = Address::new([1; 20]);
        assert!(auto_settle_key(100, &a) < auto_settle_key(101, &b));
        assert!(auto_settle_key(100, &b) < auto_settle_key(100, &a));
        assert!(auto_settle_key(100, &a) < auto_settle_upper_bound(100));
        assert!(auto_settle_key(101, &b) >= auto_settle_upper_bound(100));
    }

    #[test]
    fn test_parse_keys() {
        let from = Address::new([1; 20]);
        let to = Address::new([2; 20]);
        assert_eq!(parse_flow_key(&flow_key(&from, &to)).unwrap(), (from, to));

        let key = out_flow_key(&from, OutFlowStatus::Frozen, &to);
        assert_eq!(
            parse_out_flow_key(&key).unwrap(),
            (from, OutFlowStatus::Frozen, to)
        );

        let record = parse_auto_settle_key(&auto_settle_key(42, &to)).unwrap();
        assert_eq!(record, AutoSettleRecord { timestamp: 42, addr: to });

        assert!(parse_flow_key(&[0u8; 3]).is_err());
    }

    #[test]
    fn test_prefix_end() {
        assert_eq!(prefix_end(&[1, 2]), Some(vec![1, 3]));
        assert_eq!(prefix_end(&[1, 0xff]), Some(vec![2]));
        assert_eq!(prefix_end(&[0xff, 0xff]), None);
    }
}
