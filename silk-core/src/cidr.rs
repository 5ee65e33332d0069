//! Decomposition of inclusive integer ranges into CIDR blocks
//!
//! Keys of every width are carried as `u128` together with the width in
//! bits. A block is a start value whose low `bits - prefix` bits are zero.

use crate::{Result, SilkError};
use serde::Serialize;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Key widths a range may be expressed in
pub const VALID_WIDTHS: [u8; 4] = [8, 16, 32, 128];

/// One aligned block of `2^(bits - prefix)` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CidrBlock {
    pub start: u128,
    pub prefix: u8,
    pub bits: u8,
}

impl CidrBlock {
    /// Last value in the block
    pub fn end(&self) -> u128 {
        self.start | host_mask(self.bits - self.prefix)
    }

    pub fn contains(&self, value: u128) -> bool {
        (self.start..=self.end()).contains(&value)
    }
}

impl fmt::Display for CidrBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bits {
            32 => write!(f, "{}/{}", Ipv4Addr::from(self.start as u32), self.prefix),
            128 => write!(f, "{}/{}", Ipv6Addr::from(self.start), self.prefix),
            _ => write!(f, "{}/{}", self.start, self.prefix),
        }
    }
}

/// Mask with the low `host_bits` bits set
fn host_mask(host_bits: u8) -> u128 {
    match host_bits {
        0 => 0,
        n if n >= 128 => u128::MAX,
        n => (1u128 << n) - 1,
    }
}

fn check_value(value: u128, bits: u8) -> Result<()> {
    if !VALID_WIDTHS.contains(&bits) {
        return Err(SilkError::InvalidInput(format!("bad key width {}", bits)));
    }
    if value > host_mask(bits) {
        return Err(SilkError::InvalidInput(format!(
            "value {} does not fit in {} bits",
            value, bits
        )));
    }
    Ok(())
}

/// Largest block that begins at `start` and ends at or before `end`.
///
/// Returns the block's prefix length and the first value after it, or
/// `None` when the block reaches `end`.
pub fn compute_prefix(start: u128, end: u128, bits: u8) -> Result<(u8, Option<u128>)> {
    check_value(start, bits)?;
    check_value(end, bits)?;
    if start > end {
        return Err(SilkError::InvalidInput(format!(
            "range start {} is above end {}",
            start, end
        )));
    }

    let aligned = if start == 0 {
        bits
    } else {
        (start.trailing_zeros() as u8).min(bits)
    };
    let span = end - start;
    let fits = if span == u128::MAX {
        128
    } else {
        (127 - (span + 1).leading_zeros()) as u8
    };
    let host_bits = aligned.min(fits);
    let block_end = start | host_mask(host_bits);
    let next = (block_end < end).then(|| block_end + 1);
    Ok((bits - host_bits, next))
}

/// Cover `lo..=hi` with the fewest aligned blocks, in ascending order
pub fn range_to_blocks(lo: u128, hi: u128, bits: u8) -> Result<Vec<CidrBlock>> {
    let mut blocks = Vec::new();
    let mut start = lo;
    loop {
        let (prefix, next) = compute_prefix(start, hi, bits)?;
        blocks.push(CidrBlock {
            start,
            prefix,
            bits,
        });
        match next {
            Some(n) => start = n,
            None => return Ok(blocks),
        }
    }
}

/// First value of the `prefix`-length block holding `value`
pub fn block_start(value: u128, prefix: u8, bits: u8) -> u128 {
    value & !host_mask(bits.saturating_sub(prefix))
}

/// Last value of the `prefix`-length block holding `value`
pub fn block_end(value: u128, prefix: u8, bits: u8) -> u128 {
    block_start(value, prefix, bits) | host_mask(bits.saturating_sub(prefix))
}
