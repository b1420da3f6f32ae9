use std::ffi::{c_char, CStr};
use std::mem::size_of;

use crate::abi::Abi;
use crate::address::Address;

/// One fixed-size, word-aligned allocation holding a pointer table and an
/// optional payload segment directly behind it.
///
/// The size is decided once in [`ExecBuffer::with_layout`] and never changes.
/// The backing store is a boxed slice, so moving an `ExecBuffer` moves only
/// the handle; the base address the kernel sees stays put.
pub(crate) struct ExecBuffer {
    abi: Abi,
    words: Box<[usize]>,
    slots: usize,
    payload_len: usize,
}

impl ExecBuffer {
    /// Allocates `slots` NULL slots followed by `payload_len` zero bytes.
    pub(crate) fn with_layout(abi: Abi, slots: usize, payload_len: usize) -> Self {
        let total = slots * abi.slot_size() + payload_len;
        let words = total.div_ceil(size_of::<usize>()).max(1);
        ExecBuffer {
            abi,
            words: vec![0usize; words].into_boxed_slice(),
            slots,
            payload_len,
        }
    }

    pub(crate) fn base(&self) -> Address {
        Address::of(self.words.as_ptr())
    }

    pub(crate) fn as_table_ptr(&self) -> *const *const c_char {
        self.words.as_ptr().cast()
    }

    /// Slots including the NULL terminator.
    pub(crate) fn slot_count(&self) -> usize {
        self.slots
    }

    pub(crate) fn table_len(&self) -> usize {
        self.slots * self.abi.slot_size()
    }

    pub(crate) fn byte_len(&self) -> usize {
        self.table_len() + self.payload_len
    }

    fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<usize, u8>(&self.words)[..self.byte_len()]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        let len = self.byte_len();
        &mut bytemuck::cast_slice_mut::<usize, u8>(&mut self.words)[..len]
    }

    pub(crate) fn slot(&self, index: usize) -> Address {
        let size = self.abi.slot_size();
        let start = index * size;
        self.abi.decode(&self.bytes()[start..start + size])
    }

    /// Overwrites one slot in place. The write is exactly one slot wide, so
    /// neither the base address nor the length can change.
    pub(crate) fn patch_slot(&mut self, index: usize, addr: Address) {
        assert!(index < self.slots, "slot {index} out of {}", self.slots);
        let abi = self.abi;
        let size = abi.slot_size();
        let start = index * size;
        abi.encode(addr, &mut self.bytes_mut()[start..start + size]);
    }

    pub(crate) fn payload(&self) -> &[u8] {
        &self.bytes()[self.table_len()..]
    }

    pub(crate) fn payload_mut(&mut self) -> &mut [u8] {
        let start = self.table_len();
        &mut self.bytes_mut()[start..]
    }

    /// Resolves an address that points into this buffer's payload segment.
    pub(crate) fn cstr_at(&self, addr: Address) -> Option<&CStr> {
        let offset = addr.get().checked_sub(self.base().get())?;
        if offset < self.table_len() || offset >= self.byte_len() {
            return None;
        }
        CStr::from_bytes_until_nul(&self.bytes()[offset..]).ok()
    }
}
