use std::ffi::CStr;
use std::fmt;

/// A machine address as the kernel sees it.
///
/// Only the kernel dereferences these. Inside the crate an `Address` is
/// compared, offset, and written into table slots.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Address(usize);

impl Address {
    /// The table terminator.
    pub const NULL: Address = Address(0);

    pub const fn new(raw: usize) -> Self {
        Address(raw)
    }

    /// Address of the first byte behind `ptr`.
    pub fn of<T: ?Sized>(ptr: *const T) -> Self {
        Address(ptr.cast::<u8>() as usize)
    }

    pub const fn get(self) -> usize {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub(crate) const fn offset(self, bytes: usize) -> Self {
        Address(self.0 + bytes)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#x})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Returns where the bytes of `s` currently live.
///
/// The result is only meaningful while the borrow of `s` is held: a `CStr`
/// cannot be moved or freed while borrowed, so holding the borrow for as long
/// as the address is in use is what keeps the address valid.
pub fn address_of(s: &CStr) -> Address {
    Address::of(s.as_ptr())
}
