use std::convert::Infallible;
use std::ffi::{CStr, CString, OsStr};
use std::os::unix::ffi::OsStrExt;

use crate::address::{address_of, Address};
use crate::argv::ArgvTable;
use crate::envp::{Environment, EnvpBlock};
use crate::error::ExecError;
use crate::syscall;

/// Everything `execve` needs, laid out and pinned ahead of the call.
///
/// Once prepared, the three addresses reported here are exactly the three
/// integers the kernel receives from [`PreparedExec::exec`]. The command and
/// arguments are borrowed for `'a`, so they cannot be dropped or moved while
/// the preparation exists; the environment is copied into an owned block.
pub struct PreparedExec<'a> {
    command: &'a CStr,
    argv: ArgvTable<'a>,
    envp: EnvpBlock,
}

impl<'a> PreparedExec<'a> {
    pub fn new<I, S>(command: &'a CStr, args: I, env: &Environment) -> Result<Self, ExecError>
    where
        I: IntoIterator<Item = &'a S>,
        S: AsRef<CStr> + ?Sized + 'a,
    {
        let argv = ArgvTable::new(args)?;
        let envp = EnvpBlock::new(env)?;
        Ok(PreparedExec {
            command,
            argv,
            envp,
        })
    }

    /// The value a seccomp filter sees as the syscall's first argument.
    pub fn command_address(&self) -> Address {
        address_of(self.command)
    }

    pub fn argv_address(&self) -> Address {
        self.argv.address()
    }

    pub fn envp_address(&self) -> Address {
        self.envp.address()
    }

    pub fn command(&self) -> &'a CStr {
        self.command
    }

    pub fn argv(&self) -> &ArgvTable<'a> {
        &self.argv
    }

    pub fn envp(&self) -> &EnvpBlock {
        &self.envp
    }

    /// Replaces the current process image. Returns only if the kernel refuses.
    pub fn exec(&self) -> Result<Infallible, ExecError> {
        log::debug!(
            "execve({:?}) command={} argv={} envp={}",
            self.command,
            self.command_address(),
            self.argv_address(),
            self.envp_address()
        );
        // SAFETY: the command and argument strings are borrowed for 'a and the
        // tables are owned by self, so every address stays valid for the call.
        let err = unsafe {
            syscall::execve(
                self.command_address(),
                self.argv_address(),
                self.envp_address(),
            )
        };
        log::warn!("execve({:?}) failed: {err}", self.command);
        Err(err)
    }
}

/// Executes `command` with the caller's own strings, byte for byte and
/// address for address.
///
/// `args` is the full argument vector, so `args[0]` is the program name the
/// new image sees. It may be empty.
pub fn exec_ref<'a, I, S>(command: &'a CStr, args: I, env: &Environment) -> Result<Infallible, ExecError>
where
    I: IntoIterator<Item = &'a S>,
    S: AsRef<CStr> + ?Sized + 'a,
{
    PreparedExec::new(command, args, env)?.exec()
}

/// Like [`exec_ref`], but converts `command` and `args` to C strings first.
///
/// The copies live in this frame until the syscall, so their addresses are
/// stable for the call, but the caller cannot learn them in advance.
pub fn exec_with_env<C, A>(command: C, args: &[A], env: &Environment) -> Result<Infallible, ExecError>
where
    C: AsRef<OsStr>,
    A: AsRef<OsStr>,
{
    let command =
        CString::new(command.as_ref().as_bytes()).map_err(ExecError::InvalidCommand)?;
    let args = args
        .iter()
        .enumerate()
        .map(|(index, arg)| {
            CString::new(arg.as_ref().as_bytes())
                .map_err(|source| ExecError::InvalidArgument { index, source })
        })
        .collect::<Result<Vec<_>, _>>()?;
    exec_ref(&command, &args, env)
}

/// Like [`exec_with_env`], with a snapshot of the current environment.
pub fn exec<C, A>(command: C, args: &[A]) -> Result<Infallible, ExecError>
where
    C: AsRef<OsStr>,
    A: AsRef<OsStr>,
{
    exec_with_env(command, args, &Environment::capture())
}
