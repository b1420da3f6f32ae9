use std::ffi::{c_char, CStr};
use std::marker::PhantomData;

use crate::abi::Abi;
use crate::address::{address_of, Address};
use crate::buffer::ExecBuffer;
use crate::error::ExecError;

/// A NULL-terminated `argv` table pointing straight at the caller's strings.
///
/// Nothing is copied: slot `i` holds the address of the `i`th argument, and
/// the `'a` borrow keeps every argument alive and in place for as long as the
/// table exists.
pub struct ArgvTable<'a> {
    buffer: ExecBuffer,
    _args: PhantomData<&'a CStr>,
}

impl<'a> ArgvTable<'a> {
    pub fn new<I, S>(args: I) -> Result<Self, ExecError>
    where
        I: IntoIterator<Item = &'a S>,
        S: AsRef<CStr> + ?Sized + 'a,
    {
        let abi = Abi::native()?;
        let addresses: Vec<Address> = args
            .into_iter()
            .map(|arg| address_of(arg.as_ref()))
            .collect();

        let mut buffer = ExecBuffer::with_layout(abi, addresses.len() + 1, 0);
        for (index, addr) in addresses.iter().enumerate() {
            log::trace!("argv[{index}] = {addr}");
            buffer.patch_slot(index, *addr);
        }
        log::debug!(
            "argv table at {} with {} arguments",
            buffer.base(),
            addresses.len()
        );

        Ok(ArgvTable {
            buffer,
            _args: PhantomData,
        })
    }

    /// Address of slot 0, the value passed as the syscall's second argument.
    pub fn address(&self) -> Address {
        self.buffer.base()
    }

    pub fn as_ptr(&self) -> *const *const c_char {
        self.buffer.as_table_ptr()
    }

    /// Number of arguments, not counting the terminator.
    pub fn len(&self) -> usize {
        self.buffer.slot_count() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots including the NULL terminator.
    pub fn slot_count(&self) -> usize {
        self.buffer.slot_count()
    }

    pub fn slot(&self, index: usize) -> Option<Address> {
        (index < self.slot_count()).then(|| self.buffer.slot(index))
    }

    pub fn byte_len(&self) -> usize {
        self.buffer.byte_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::ffi::CString;

    #[test]
    fn echo_hello() {
        let args = [c"echo", c"hello"];
        let table = ArgvTable::new(&args).unwrap();
        assert_eq!(table.slot_count(), 3);
        assert_eq!(table.slot(0), Some(address_of(args[0])));
        assert_eq!(table.slot(1), Some(address_of(args[1])));
        assert_eq!(table.slot(2), Some(Address::NULL));
        assert_eq!(table.slot(3), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn empty_list_is_a_lone_null() {
        let args: [&CStr; 0] = [];
        let table = ArgvTable::new(&args).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.slot_count(), 1);
        assert_eq!(table.slot(0), Some(Address::NULL));
        assert_eq!(table.byte_len(), std::mem::size_of::<usize>());
    }

    #[test]
    fn slots_point_at_owned_strings_without_copying() {
        let args = vec![CString::new("ls").unwrap(), CString::new("-l").unwrap()];
        let table = ArgvTable::new(&args).unwrap();
        for (index, arg) in args.iter().enumerate() {
            assert_eq!(table.slot(index).unwrap().get(), arg.as_ptr() as usize);
        }
    }

    #[test]
    fn table_pointer_reads_back_as_argv() {
        let args = [c"a", c"bc"];
        let table = ArgvTable::new(&args).unwrap();
        let argv = table.as_ptr();
        unsafe {
            assert_eq!(CStr::from_ptr(*argv), c"a");
            assert_eq!(CStr::from_ptr(*argv.add(1)), c"bc");
            assert!((*argv.add(2)).is_null());
        }
    }

    proptest! {
        #[test]
        fn every_argument_gets_its_own_slot(raw in prop::collection::vec("[a-zA-Z0-9 _./=-]{0,16}", 0..24)) {
            let args: Vec<CString> = raw.iter().map(|s| CString::new(s.as_str()).unwrap()).collect();
            let table = ArgvTable::new(&args).unwrap();

            prop_assert_eq!(table.slot_count(), args.len() + 1);
            prop_assert_eq!(table.slot(args.len()), Some(Address::NULL));
            for (index, arg) in args.iter().enumerate() {
                prop_assert_eq!(table.slot(index), Some(address_of(arg)));
            }
        }
    }
}
