use std::fs::remove_file;
use std::path::Path;

use crate::syscall::syscall::create_syscall;
use crate::syscall::Syscall;

#[derive(Debug, thiserror::Error)]
pub enum SymlinkError {
    #[error("failed to symlink {link:?}")]
    Syscall {
        link: std::path::PathBuf,
        source: crate::syscall::SyscallError,
    },
    #[error("could not remove {path:?}")]
    Remove {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
}

type Result<T> = std::result::Result<T, SymlinkError>;

const DEFAULT_SYMLINKS: [(&str, &str); 4] = [
    ("/proc/self/fd", "dev/fd"),
    ("/proc/self/fd/0", "dev/stdin"),
    ("/proc/self/fd/1", "dev/stdout"),
    ("/proc/self/fd/2", "dev/stderr"),
];

pub struct Symlink {
    syscall: Box<dyn Syscall>,
}

impl Default for Symlink {
    fn default() -> Self {
        Self::new()
    }
}

impl Symlink {
    pub fn new() -> Symlink {
        Symlink::with_syscall(create_syscall())
    }

    pub fn with_syscall(syscall: Box<dyn Syscall>) -> Symlink {
        Symlink { syscall }
    }

    /// Points /dev/ptmx at the devpts instance mounted at /dev/pts
    pub fn setup_ptmx(&self, rootfs: &Path) -> Result<()> {
        let ptmx = rootfs.join("dev/ptmx");
        if let Err(e) = remove_file(&ptmx) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(SymlinkError::Remove {
                    path: ptmx,
                    source: e,
                });
            }
        }

        self.link(Path::new("pts/ptmx"), &ptmx)
    }

    pub fn setup_default_symlinks(&self, rootfs: &Path) -> Result<()> {
        for (src, dst) in DEFAULT_SYMLINKS {
            self.link(Path::new(src), &rootfs.join(dst))?;
        }

        Ok(())
    }

    fn link(&self, original: &Path, link: &Path) -> Result<()> {
        self.syscall.symlink(original, link).map_err(|err| {
            tracing::error!(?err, ?original, ?link, "failed to symlink");
            SymlinkError::Syscall {
                link: link.to_path_buf(),
                source: err,
            }
        })
    }
}
