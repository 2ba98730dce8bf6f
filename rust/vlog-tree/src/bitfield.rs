use std::collections::{BTreeMap, BTreeSet};

/// Bytes per bitfield page. Pages are the unit of persistence.
pub const PAGE_SIZE: usize = 1024;

/// Bits per bitfield page
pub const PAGE_BITS: u64 = PAGE_SIZE as u64 * 8;

/// A sparse, paged bit vector. Bit `i` lives in byte `i / 8` under the mask
/// `0x80 >> (i % 8)`, which matches the byte layout persisted to storage and
/// announced to peers.
///
/// Pages that were modified since they were last persisted are tracked as
/// dirty so a sync only needs to write those.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bitfield {
    pages: BTreeMap<u64, Vec<u8>>,
    dirty: BTreeSet<u64>,
}

impl Bitfield {
    /// Load a bitfield from its persisted byte form. The final page may be
    /// short; missing bytes read as zero. Nothing is marked dirty.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut bitfield = Bitfield::default();
        for (page, chunk) in bytes.chunks(PAGE_SIZE).enumerate() {
            if chunk.iter().all(|byte| *byte == 0) {
                continue;
            }
            let mut buffer = vec![0u8; PAGE_SIZE];
            buffer[..chunk.len()].copy_from_slice(chunk);
            bitfield.pages.insert(page as u64, buffer);
        }
        bitfield
    }

    /// Whether bit `index` is set
    pub fn get(&self, index: u64) -> bool {
        let page = index / PAGE_BITS;
        let bit = index % PAGE_BITS;
        self.pages
            .get(&page)
            .map(|buffer| buffer[(bit / 8) as usize] & mask(bit) != 0)
            .unwrap_or(false)
    }

    /// Set or clear bit `index`. Returns true when the bit changed.
    pub fn set(&mut self, index: u64, value: bool) -> bool {
        let page = index / PAGE_BITS;
        let bit = index % PAGE_BITS;

        if !value && !self.pages.contains_key(&page) {
            return false;
        }

        let buffer = self
            .pages
            .entry(page)
            .or_insert_with(|| vec![0u8; PAGE_SIZE]);
        let byte = &mut buffer[(bit / 8) as usize];
        let before = *byte;
        if value {
            *byte |= mask(bit);
        } else {
            *byte &= !mask(bit);
        }

        if *byte == before {
            return false;
        }
        self.dirty.insert(page);
        true
    }

    /// OR `bytes` into the bitfield starting at byte `offset`. Pages that are
    /// only partially covered keep their other bytes, and pages not yet
    /// present are zero-extended before the merge. Returns true when any bit
    /// changed.
    pub fn merge(&mut self, offset: u64, bytes: &[u8]) -> bool {
        let mut changed = false;
        for (position, incoming) in bytes.iter().enumerate() {
            if *incoming == 0 {
                continue;
            }
            let absolute = offset + position as u64;
            let page = absolute / PAGE_SIZE as u64;
            let buffer = self
                .pages
                .entry(page)
                .or_insert_with(|| vec![0u8; PAGE_SIZE]);
            let byte = &mut buffer[(absolute % PAGE_SIZE as u64) as usize];
            if *byte | incoming != *byte {
                *byte |= incoming;
                self.dirty.insert(page);
                changed = true;
            }
        }
        changed
    }

    /// The bytes in `start..end` (byte offsets), zero where nothing is stored
    pub fn bytes(&self, start: u64, end: u64) -> Vec<u8> {
        let mut output = vec![0u8; end.saturating_sub(start) as usize];
        let first = start / PAGE_SIZE as u64;
        let last = end.div_ceil(PAGE_SIZE as u64);
        for (page, buffer) in self.pages.range(first..last) {
            let page_start = page * PAGE_SIZE as u64;
            for (position, byte) in buffer.iter().enumerate() {
                let absolute = page_start + position as u64;
                if absolute >= start && absolute < end {
                    output[(absolute - start) as usize] = *byte;
                }
            }
        }
        output
    }

    /// Every byte up to and including the last non-zero one
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.bytes(0, self.byte_length());
        while bytes.last() == Some(&0) {
            bytes.pop();
        }
        bytes
    }

    /// Length in bytes of the space spanned by allocated pages
    pub fn byte_length(&self) -> u64 {
        self.pages
            .keys()
            .next_back()
            .map(|page| (page + 1) * PAGE_SIZE as u64)
            .unwrap_or(0)
    }

    /// Length in bits of the space spanned by allocated pages
    pub fn bit_length(&self) -> u64 {
        self.byte_length() * 8
    }

    /// Snapshot of every dirty page as `(page, bytes)`
    pub fn dirty_pages(&self) -> Vec<(u64, Vec<u8>)> {
        self.dirty
            .iter()
            .filter_map(|page| self.pages.get(page).map(|buffer| (*page, buffer.clone())))
            .collect()
    }

    /// Forget that `page` is dirty, once it has been persisted
    pub fn mark_clean(&mut self, page: u64) {
        self.dirty.remove(&page);
    }

    /// Whether anything still needs persisting
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }
}

fn mask(bit: u64) -> u8 {
    0x80 >> (bit % 8)
}
