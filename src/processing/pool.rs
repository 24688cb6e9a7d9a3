//! Fixed-size address block allocation from a parent range.
//!
//! The pool hands out child blocks of one prefix length in strictly
//! increasing address order. Blocks are kept sorted by address; a block is
//! only computed the first time its position is needed.

use crate::error::{Error, Result};
use crate::models::{Ipv4, MAX_LENGTH};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One child block and whether it is handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrBlock {
    pub cidr: Ipv4,
    pub reserved: bool,
}

/// Allocator of `/child_prefix` blocks inside `parent`.
///
/// All operations take the internal lock for the whole
/// read-compute-reserve sequence, so a pool can be shared between threads.
#[derive(Debug)]
pub struct AddressPool {
    parent: Ipv4,
    child_prefix: u8,
    blocks: Mutex<Vec<CidrBlock>>,
}

impl AddressPool {
    /// Create a pool over `parent` carving `/child_prefix` blocks.
    ///
    /// `parent` must be a network address and `child_prefix` strictly
    /// narrower than the parent prefix.
    pub fn new(parent: Ipv4, child_prefix: u8) -> Result<AddressPool> {
        if !parent.is_network() {
            return Err(Error::InvalidRange(format!(
                "{parent} has host bits set, expected {}",
                parent.network()
            )));
        }
        if child_prefix <= parent.mask || child_prefix > MAX_LENGTH {
            return Err(Error::InvalidRange(format!(
                "child prefix /{child_prefix} must be narrower than {parent} and at most /{MAX_LENGTH}"
            )));
        }
        Ok(AddressPool {
            parent,
            child_prefix,
            blocks: Mutex::new(Vec::new()),
        })
    }

    pub fn parent(&self) -> Ipv4 {
        self.parent
    }

    pub fn child_prefix(&self) -> u8 {
        self.child_prefix
    }

    /// Number of child blocks the parent holds.
    pub fn capacity(&self) -> u64 {
        1u64 << (self.child_prefix - self.parent.mask)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CidrBlock>> {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Position of a child-aligned address within the parent.
    fn index_of(&self, block: &Ipv4) -> u64 {
        let offset = u32::from(block.lo()) - u32::from(self.parent.lo());
        (offset as u64) >> (MAX_LENGTH - self.child_prefix)
    }

    fn block_at(&self, index: u64) -> Ipv4 {
        let step = 1u64 << (MAX_LENGTH - self.child_prefix);
        let base = u32::from(self.parent.lo()) as u64 + index * step;
        Ipv4 {
            addr: (base as u32).into(),
            mask: self.child_prefix,
        }
    }

    /// Reserve the lowest free block.
    ///
    /// Previously released blocks are reused first, then the lowest position
    /// not yet computed is appended.
    pub fn carve_next(&self) -> Result<Ipv4> {
        let mut blocks = self.lock();

        if let Some(free) = blocks.iter_mut().find(|b| !b.reserved) {
            free.reserved = true;
            log::debug!("pool {}: reuse {}", self.parent, free.cidr);
            return Ok(free.cidr);
        }

        // blocks are sorted, so the first index mismatch is the lowest gap
        let next_index = blocks
            .iter()
            .enumerate()
            .find(|(i, b)| self.index_of(&b.cidr) != *i as u64)
            .map(|(i, _)| i as u64)
            .unwrap_or(blocks.len() as u64);

        if next_index >= self.capacity() {
            log::warn!(
                "pool {}: all {} /{} blocks reserved",
                self.parent,
                self.capacity(),
                self.child_prefix
            );
            return Err(Error::PoolExhausted {
                parent: self.parent,
                child_prefix: self.child_prefix,
            });
        }

        let cidr = self.block_at(next_index);
        blocks.insert(
            next_index as usize,
            CidrBlock {
                cidr,
                reserved: true,
            },
        );
        log::debug!("pool {}: carved {}", self.parent, cidr);
        Ok(cidr)
    }

    /// Mark an externally discovered block as taken.
    ///
    /// A block wider than the child size reserves every child it covers; a
    /// narrower one reserves the child that encloses it.
    pub fn reserve(&self, block: Ipv4) -> Result<()> {
        if !self.parent.contains(&block) {
            return Err(Error::BlockNotInParent {
                block,
                parent: self.parent,
            });
        }
        let mut blocks = self.lock();
        for index in self.covered_indexes(&block) {
            let cidr = self.block_at(index);
            match blocks.binary_search_by_key(&cidr, |b| b.cidr) {
                Ok(pos) => blocks[pos].reserved = true,
                Err(pos) => blocks.insert(
                    pos,
                    CidrBlock {
                        cidr,
                        reserved: true,
                    },
                ),
            }
        }
        log::debug!("pool {}: reserved {}", self.parent, block);
        Ok(())
    }

    /// Hand a block back. Unknown blocks are ignored.
    pub fn release(&self, block: Ipv4) {
        if !self.parent.contains(&block) || block.mask > self.child_prefix {
            log::debug!("pool {}: nothing to release for {}", self.parent, block);
            return;
        }
        let mut blocks = self.lock();
        for index in self.covered_indexes(&block) {
            let cidr = self.block_at(index);
            if let Ok(pos) = blocks.binary_search_by_key(&cidr, |b| b.cidr) {
                blocks[pos].reserved = false;
                log::debug!("pool {}: released {}", self.parent, cidr);
            }
        }
    }

    fn covered_indexes(&self, block: &Ipv4) -> std::ops::Range<u64> {
        let first = self.index_of(&block.network());
        if block.mask >= self.child_prefix {
            first..first + 1
        } else {
            first..first + (1u64 << (self.child_prefix - block.mask))
        }
    }

    pub fn is_reserved(&self, block: &Ipv4) -> bool {
        self.lock()
            .iter()
            .any(|b| b.reserved && b.cidr == *block)
    }

    pub fn reserved_count(&self) -> usize {
        self.lock().iter().filter(|b| b.reserved).count()
    }

    /// Snapshot of the computed blocks in address order.
    pub fn blocks(&self) -> Vec<CidrBlock> {
        self.lock().clone()
    }
}
