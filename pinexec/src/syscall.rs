// Raw execve. Linux uses the syscall instruction directly on x86_64 and
// aarch64; other architectures go through libc::syscall.

use std::io;

use crate::address::Address;
use crate::error::ExecError;

// Syscall numbers - architecture specific
#[cfg(target_arch = "x86_64")]
mod syscall_numbers {
    pub const SYS_EXECVE: usize = 59;
}

#[cfg(target_arch = "aarch64")]
mod syscall_numbers {
    pub const SYS_EXECVE: usize = 221;
}

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
use syscall_numbers::*;

/// Returns the raw kernel result: negative errno on failure.
#[cfg(target_arch = "x86_64")]
unsafe fn raw_execve(filename: usize, argv: usize, envp: usize) -> isize {
    let ret: isize;
    core::arch::asm!(
        "syscall",
        in("rax") SYS_EXECVE,
        in("rdi") filename,
        in("rsi") argv,
        in("rdx") envp,
        lateout("rax") ret,
        lateout("rcx") _,
        lateout("r11") _,
        options(nostack),
    );
    ret
}

#[cfg(target_arch = "aarch64")]
unsafe fn raw_execve(filename: usize, argv: usize, envp: usize) -> isize {
    let ret: isize;
    core::arch::asm!(
        "svc #0",
        in("x8") SYS_EXECVE,
        in("x0") filename,
        in("x1") argv,
        in("x2") envp,
        lateout("x0") ret,
        options(nostack),
    );
    ret
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
unsafe fn raw_execve(filename: usize, argv: usize, envp: usize) -> isize {
    let ret = libc::syscall(
        libc::SYS_execve,
        filename as libc::c_long,
        argv as libc::c_long,
        envp as libc::c_long,
    );
    if ret < 0 {
        // Read errno before anything else can touch it.
        let errno = io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(libc::EINVAL);
        return -(errno as isize);
    }
    ret as isize
}

/// Issues `execve(command, argv, envp)`.
///
/// Only returns on failure, so the result is always the error.
///
/// # Safety
///
/// `command` must point at a NUL-terminated path, and `argv`/`envp` at
/// NULL-terminated tables of NUL-terminated strings. All of it must stay
/// alive and unmoved until this returns.
pub(crate) unsafe fn execve(command: Address, argv: Address, envp: Address) -> ExecError {
    let ret = raw_execve(command.get(), argv.get(), envp.get());

    if ret >= 0 {
        // The kernel never reports success to the caller of a working exec.
        return ExecError::Syscall {
            ret,
            errno: 0,
            message: format!("execve returned {ret} without replacing the process"),
        };
    }
    let errno = -ret as i32;
    ExecError::Syscall {
        ret,
        errno,
        message: describe(errno),
    }
}

/// Platform text for an errno, without the " (os error N)" suffix.
fn describe(errno: i32) -> String {
    let text = io::Error::from_raw_os_error(errno).to_string();
    match text.rfind(" (os error ") {
        Some(cut) => text[..cut].to_string(),
        None => text,
    }
}
