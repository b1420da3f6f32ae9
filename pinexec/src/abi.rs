use std::mem::size_of;
use std::sync::OnceLock;

use crate::address::Address;
use crate::error::ExecError;

#[cfg(not(any(target_pointer_width = "32", target_pointer_width = "64")))]
compile_error!("pinexec supports only 32-bit and 64-bit address widths");

/// Width of one table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerWidth {
    Bits32,
    Bits64,
}

impl PointerWidth {
    pub const fn bytes(self) -> usize {
        match self {
            PointerWidth::Bits32 => 4,
            PointerWidth::Bits64 => 8,
        }
    }
}

/// How addresses are stored in `argv`/`envp` slots on this host: native
/// byte order, one pointer-width unsigned integer per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abi {
    width: PointerWidth,
}

static NATIVE: OnceLock<Abi> = OnceLock::new();

impl Abi {
    pub(crate) fn from_width(bytes: usize) -> Result<Self, ExecError> {
        let width = match bytes {
            4 => PointerWidth::Bits32,
            8 => PointerWidth::Bits64,
            width => return Err(ExecError::UnsupportedAbi { width }),
        };
        Ok(Abi { width })
    }

    /// The host ABI. Probed once per process; later calls return the cached
    /// result.
    pub fn native() -> Result<Abi, ExecError> {
        if let Some(abi) = NATIVE.get() {
            return Ok(*abi);
        }
        let abi = Abi::from_width(size_of::<usize>())?;
        log::debug!("probed native ABI: {}-byte slots", abi.slot_size());
        Ok(*NATIVE.get_or_init(|| abi))
    }

    pub fn width(self) -> PointerWidth {
        self.width
    }

    pub fn slot_size(self) -> usize {
        self.width.bytes()
    }

    /// Writes `addr` into `slot`, which must be exactly one slot wide.
    pub(crate) fn encode(self, addr: Address, slot: &mut [u8]) {
        // Only the native ABI is constructible outside tests, so the
        // narrowing below never drops bits.
        match self.width {
            PointerWidth::Bits32 => slot.copy_from_slice(&(addr.get() as u32).to_ne_bytes()),
            PointerWidth::Bits64 => slot.copy_from_slice(&(addr.get() as u64).to_ne_bytes()),
        }
    }

    pub(crate) fn decode(self, slot: &[u8]) -> Address {
        match self.width {
            PointerWidth::Bits32 => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(slot);
                Address::new(u32::from_ne_bytes(raw) as usize)
            }
            PointerWidth::Bits64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(slot);
                Address::new(u64::from_ne_bytes(raw) as usize)
            }
        }
    }
}
