//! Raw `execve` with address-stable argument and environment tables.
//!
//! `pinexec` lays out the `argv`/`envp` structures the Linux `execve` syscall
//! expects and issues the syscall directly, without going through libc or
//! `std::process`. The address of every string handed to the kernel is known
//! before the call and cannot move until the call returns, so a seccomp filter
//! installed beforehand can match on the literal command-path pointer.
//!
//! ```no_run
//! use pinexec::{Environment, PreparedExec};
//!
//! let command = c"/bin/echo";
//! let args = [c"echo", c"hello"];
//! let env = Environment::new();
//!
//! let prepared = PreparedExec::new(command, &args, &env)?;
//! // Install a filter that only admits `prepared.command_address()` here.
//! let err = prepared.exec().unwrap_err();
//! eprintln!("{err}");
//! # Ok::<(), pinexec::ExecError>(())
//! ```
//!
//! Linux only; the syscall is issued with inline assembly on x86_64 and
//! aarch64 and through `libc::syscall` elsewhere.

#[cfg(not(target_os = "linux"))]
compile_error!("pinexec only supports Linux");

mod abi;
mod address;
mod argv;
mod buffer;
mod envp;
mod error;
mod exec;
mod syscall;

pub use abi::{Abi, PointerWidth};
pub use address::{address_of, Address};
pub use argv::ArgvTable;
pub use envp::{Environment, EnvpBlock};
pub use error::ExecError;
pub use exec::{exec, exec_ref, exec_with_env, PreparedExec};
