//! Selects which implementation of the Syscall trait is handed to the rest of
//! the crate. Tests build their own TestHelperSyscall instead.

use crate::syscall::linux::LinuxSyscall;
use crate::syscall::Syscall;

pub fn create_syscall() -> Box<dyn Syscall> {
    Box::new(LinuxSyscall)
}
