use std::collections::btree_map::{self, BTreeMap};
use std::ffi::{c_char, CStr, OsStr, OsString};
use std::os::unix::ffi::OsStrExt;

use crate::abi::Abi;
use crate::address::Address;
use crate::buffer::ExecBuffer;
use crate::error::ExecError;

/// Environment handed to the new program: unique keys, arbitrary byte values.
///
/// Iteration is in key order, which is also the order entries appear in the
/// built [`EnvpBlock`]. The kernel attaches no meaning to that order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<OsString, OsString>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current process environment.
    pub fn capture() -> Self {
        std::env::vars_os().collect()
    }

    /// Sets `key`, returning the value it replaced.
    pub fn set(&mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Option<OsString> {
        self.vars.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: impl AsRef<OsStr>) -> Option<OsString> {
        self.vars.remove(key.as_ref())
    }

    pub fn get(&self, key: impl AsRef<OsStr>) -> Option<&OsStr> {
        self.vars.get(key.as_ref()).map(OsString::as_os_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            inner: self.vars.iter(),
        }
    }
}

impl<K: Into<OsString>, V: Into<OsString>> FromIterator<(K, V)> for Environment {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut env = Environment::new();
        env.extend(iter);
        env
    }
}

impl<K: Into<OsString>, V: Into<OsString>> Extend<(K, V)> for Environment {
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (key, value) in iter {
            self.set(key, value);
        }
    }
}

impl<'e> IntoIterator for &'e Environment {
    type Item = (&'e OsStr, &'e OsStr);
    type IntoIter = Iter<'e>;

    fn into_iter(self) -> Iter<'e> {
        self.iter()
    }
}

pub struct Iter<'e> {
    inner: btree_map::Iter<'e, OsString, OsString>,
}

impl<'e> Iterator for Iter<'e> {
    type Item = (&'e OsStr, &'e OsStr);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(key, value)| (key.as_os_str(), value.as_os_str()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

fn check_entry(key: &[u8], value: &[u8]) -> Result<(), ExecError> {
    let reason = if key.is_empty() {
        "empty key"
    } else if key.contains(&b'=') {
        "key contains '='"
    } else if key.contains(&0) {
        "key contains a NUL byte"
    } else if value.contains(&0) {
        "value contains a NUL byte"
    } else {
        return Ok(());
    };
    Err(ExecError::InvalidEnvironment {
        key: String::from_utf8_lossy(key).into_owned(),
        reason,
    })
}

/// A self-contained `envp` block: the pointer table followed by the
/// `KEY=VALUE\0` strings it points at, all in one allocation.
///
/// Layout for N entries with pointer width W:
///
/// ```text
/// base                                base + (N+1)*W
/// | slot 0 | slot 1 | .. | NULL |     | k0=v0\0 | k1=v1\0 | .. |
///     |        |                        ^         ^
///     +--------|------------------------+         |
///              +----------------------------------+
/// ```
pub struct EnvpBlock {
    buffer: ExecBuffer,
}

impl EnvpBlock {
    pub fn new(env: &Environment) -> Result<Self, ExecError> {
        Self::from_pairs(env)
    }

    /// Builds a block from raw pairs. Keys are expected to be unique; a
    /// duplicate is laid out twice and the kernel keeps both.
    pub fn from_pairs<'e, I>(pairs: I) -> Result<Self, ExecError>
    where
        I: IntoIterator<Item = (&'e OsStr, &'e OsStr)>,
    {
        let abi = Abi::native()?;

        let mut entries = Vec::new();
        let mut payload_len = 0;
        for (key, value) in pairs {
            let (key, value) = (key.as_bytes(), value.as_bytes());
            check_entry(key, value)?;
            payload_len += key.len() + 1 + value.len() + 1;
            entries.push((key, value));
        }

        // Placeholders and payload space are reserved together; this is the
        // only allocation the block ever gets.
        let mut buffer = ExecBuffer::with_layout(abi, entries.len() + 1, payload_len);

        let payload = buffer.payload_mut();
        let mut cursor = 0;
        for (key, value) in &entries {
            payload[cursor..cursor + key.len()].copy_from_slice(key);
            cursor += key.len();
            payload[cursor] = b'=';
            cursor += 1;
            payload[cursor..cursor + value.len()].copy_from_slice(value);
            cursor += value.len();
            payload[cursor] = 0;
            cursor += 1;
        }
        debug_assert_eq!(cursor, payload_len);

        // Addresses come from the final base, after every byte is in place.
        let base = buffer.base();
        let len = buffer.byte_len();
        let mut running = buffer.table_len();
        for (index, (key, value)) in entries.iter().enumerate() {
            let addr = base.offset(running);
            log::trace!("envp[{index}] = {addr}");
            buffer.patch_slot(index, addr);
            running += key.len() + 1 + value.len() + 1;
        }
        debug_assert_eq!((buffer.base(), buffer.byte_len()), (base, len));

        log::debug!(
            "envp block at {base} with {} entries, {payload_len} payload bytes",
            entries.len()
        );
        Ok(EnvpBlock { buffer })
    }

    /// Address of slot 0, the value passed as the syscall's third argument.
    pub fn address(&self) -> Address {
        self.buffer.base()
    }

    pub fn as_ptr(&self) -> *const *const c_char {
        self.buffer.as_table_ptr()
    }

    /// Number of entries, not counting the terminator.
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

    /// Table plus payload, in bytes.
    pub fn byte_len(&self) -> usize {
        self.buffer.byte_len()
    }

    /// The packed `KEY=VALUE\0` strings.
    pub fn payload(&self) -> &[u8] {
        self.buffer.payload()
    }

    /// The string slot `index` points at, found by following the slot.
    pub fn entry(&self, index: usize) -> Option<&CStr> {
        if index >= self.len() {
            return None;
        }
        self.buffer.cstr_at(self.buffer.slot(index))
    }

    /// Text view of [`EnvpBlock::entry`].
    pub fn entry_str(&self, index: usize) -> Result<&str, ExecError> {
        let entry = self.entry(index).ok_or(ExecError::SlotOutOfRange {
            index,
            slots: self.len(),
        })?;
        entry
            .to_str()
            .map_err(|source| ExecError::NotUtf8 { index, source })
    }

    /// `(key, value)` pairs in slot order, read back through the slots.
    pub fn entries(&self) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        (0..self.len())
            .filter_map(|index| self.entry(index))
            .map(|entry| {
                let bytes = entry.to_bytes();
                match bytes.iter().position(|&b| b == b'=') {
                    Some(eq) => (&bytes[..eq], &bytes[eq + 1..]),
                    None => (bytes, &[][..]),
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::os::unix::ffi::OsStringExt;

    fn env_of(pairs: &[(&str, &str)]) -> Environment {
        pairs.iter().copied().collect()
    }

    #[test]
    fn foo_bar_baz() {
        let env = env_of(&[("foo", "bar"), ("baz", "1.....")]);
        let block = EnvpBlock::new(&env).unwrap();

        assert_eq!(block.slot_count(), 3);
        assert_eq!(block.slot(2), Some(Address::NULL));

        let strings: BTreeSet<&[u8]> = block
            .payload()
            .split_inclusive(|&b| b == 0)
            .collect();
        let expected: BTreeSet<&[u8]> = [&b"foo=bar\0"[..], &b"baz=1.....\0"[..]].into();
        assert_eq!(strings, expected);

        let entries: BTreeSet<&str> = (0..2).map(|i| block.entry_str(i).unwrap()).collect();
        assert_eq!(entries, BTreeSet::from(["foo=bar", "baz=1....."]));
    }

    #[test]
    fn slots_are_computed_from_the_final_base() {
        let env = env_of(&[("A", "1"), ("BB", "22")]);
        let block = EnvpBlock::new(&env).unwrap();
        let table = 3 * std::mem::size_of::<usize>();

        assert_eq!(block.payload(), b"A=1\0BB=22\0");
        assert_eq!(block.slot(0), Some(block.address().offset(table)));
        assert_eq!(block.slot(1), Some(block.address().offset(table + 4)));
        assert_eq!(block.byte_len(), table + 10);
    }

    #[test]
    fn empty_environment() {
        let block = EnvpBlock::new(&Environment::new()).unwrap();
        assert!(block.is_empty());
        assert_eq!(block.slot_count(), 1);
        assert_eq!(block.slot(0), Some(Address::NULL));
        assert!(block.payload().is_empty());
        assert_eq!(block.entry(0), None);
    }

    #[test]
    fn moving_the_block_keeps_its_pointers_valid() {
        let block = EnvpBlock::new(&env_of(&[("KEY", "value")])).unwrap();
        let base = block.address();
        let boxed = Box::new(block);
        assert_eq!(boxed.address(), base);
        assert_eq!(boxed.entry_str(0).unwrap(), "KEY=value");
    }

    #[test]
    fn table_pointer_reads_back_as_envp() {
        let block = EnvpBlock::new(&env_of(&[("X", "y")])).unwrap();
        let envp = block.as_ptr();
        unsafe {
            assert_eq!(CStr::from_ptr(*envp), c"X=y");
            assert!((*envp.add(1)).is_null());
        }
    }

    #[test]
    fn empty_values_and_equals_in_values_survive() {
        let env = env_of(&[("EMPTY", ""), ("EQ", "a=b=c")]);
        let block = EnvpBlock::new(&env).unwrap();
        let entries: Vec<(&[u8], &[u8])> = block.entries().collect();
        assert_eq!(
            entries,
            vec![(&b"EMPTY"[..], &b""[..]), (&b"EQ"[..], &b"a=b=c"[..])]
        );
    }

    #[test]
    fn non_utf8_values_are_kept_verbatim() {
        let mut env = Environment::new();
        env.set("RAW", OsString::from_vec(vec![0xff, 0xfe, b'x']));
        let block = EnvpBlock::new(&env).unwrap();

        assert_eq!(block.entry(0).unwrap().to_bytes(), b"RAW=\xff\xfex");
        assert!(matches!(
            block.entry_str(0),
            Err(ExecError::NotUtf8 { index: 0, .. })
        ));
        assert!(matches!(
            block.entry_str(1),
            Err(ExecError::SlotOutOfRange { index: 1, slots: 1 })
        ));
    }

    #[test]
    fn duplicate_keys_are_laid_out_twice() {
        let pairs = [
            (OsStr::new("DUP"), OsStr::new("first")),
            (OsStr::new("DUP"), OsStr::new("second")),
        ];
        let block = EnvpBlock::from_pairs(pairs).unwrap();

        assert_eq!(block.slot_count(), 3);
        assert_eq!(block.len(), 2);
        assert_eq!(block.entry_str(0).unwrap(), "DUP=first");
        assert_eq!(block.entry_str(1).unwrap(), "DUP=second");
        assert!(block.slot(2).unwrap().is_null());
    }

    #[test]
    fn malformed_entries_are_rejected() {
        let cases: [(&[u8], &[u8], &str); 4] = [
            (b"", b"v", "empty key"),
            (b"A=B", b"v", "key contains '='"),
            (b"A\0", b"v", "key contains a NUL byte"),
            (b"A", b"v\0w", "value contains a NUL byte"),
        ];
        for (key, value, want) in cases {
            let pairs = [(OsStr::from_bytes(key), OsStr::from_bytes(value))];
            match EnvpBlock::from_pairs(pairs) {
                Err(ExecError::InvalidEnvironment { reason, .. }) => assert_eq!(reason, want),
                Err(other) => panic!("{key:?}: unexpected error {other}"),
                Ok(_) => panic!("{key:?}: accepted"),
            }
        }
    }

    #[test]
    fn environment_map_semantics() {
        let mut env = Environment::new();
        assert_eq!(env.set("K", "1"), None);
        assert_eq!(env.set("K", "2"), Some(OsString::from("1")));
        assert_eq!(env.get("K"), Some(OsStr::new("2")));
        assert_eq!(env.len(), 1);
        assert_eq!(env.remove("K"), Some(OsString::from("2")));
        assert!(env.is_empty());
    }

    #[test]
    fn capture_reflects_the_process_environment() {
        let env = Environment::capture();
        assert_eq!(env.len(), std::env::vars_os().count());
        if let Some((key, value)) = std::env::vars_os().next() {
            assert_eq!(env.get(&key), Some(value.as_os_str()));
        }
    }

    proptest! {
        #[test]
        fn block_round_trips_the_environment(
            vars in prop::collection::btree_map(
                "[A-Za-z_][A-Za-z0-9_]{0,8}",
                prop::collection::vec(1u8..=255, 0..12),
                0..16,
            )
        ) {
            let env: Environment = vars
                .iter()
                .map(|(k, v)| (OsString::from(k), OsString::from_vec(v.clone())))
                .collect();
            let block = EnvpBlock::new(&env).unwrap();

            let payload_len: usize = vars.iter().map(|(k, v)| k.len() + 1 + v.len() + 1).sum();
            prop_assert_eq!(block.slot_count(), vars.len() + 1);
            prop_assert_eq!(block.payload().len(), payload_len);
            prop_assert_eq!(block.slot(vars.len()), Some(Address::NULL));

            let read_back: BTreeMap<Vec<u8>, Vec<u8>> = block
                .entries()
                .map(|(k, v)| (k.to_vec(), v.to_vec()))
                .collect();
            let expected: BTreeMap<Vec<u8>, Vec<u8>> = vars
                .into_iter()
                .map(|(k, v)| (k.into_bytes(), v))
                .collect();
            prop_assert_eq!(read_back, expected);
        }
    }
}
