use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Descriptor the init process finds the read end of the sync pipe on
pub const SYNC_PIPE_FD: RawFd = 3;
/// Descriptor the init process finds the console socket on
pub const CONSOLE_SOCKET_FD: RawFd = 4;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("failed to create the sync pipe")]
    Pipe(#[source] nix::Error),
    #[error("failed to serialize the message")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to deserialize the message")]
    Deserialize(#[source] serde_json::Error),
    #[error("failed to write the message")]
    Write(#[source] std::io::Error),
}

type Result<T> = std::result::Result<T, ChannelError>;

/// Channel Design
///
/// The sync pipe carries exactly one message, from the runtime to the init
/// process. The runtime serializes the container once and closes its end,
/// init reads until the end of the pipe and decodes it. Both halves consume
/// themselves, so neither side can use the pipe twice.
pub fn sync_channel() -> Result<(SyncSender, SyncReceiver)> {
    let (read, write) = pipe2(OFlag::O_CLOEXEC).map_err(ChannelError::Pipe)?;
    Ok((
        SyncSender {
            file: File::from(write),
        },
        SyncReceiver {
            file: File::from(read),
        },
    ))
}

pub struct SyncSender {
    file: File,
}

impl SyncSender {
    pub fn send<T: Serialize>(self, msg: &T) -> Result<()> {
        let mut writer = BufWriter::new(self.file);
        serde_json::to_writer(&mut writer, msg).map_err(|err| {
            tracing::error!(?err, "failed to send message over the sync pipe");
            ChannelError::Serialize(err)
        })?;
        writer.flush().map_err(ChannelError::Write)?;
        // dropping the writer closes the pipe, which ends the message
        Ok(())
    }
}

pub struct SyncReceiver {
    file: File,
}

impl SyncReceiver {
    /// Takes over an inherited descriptor.
    ///
    /// # Safety
    ///
    /// `fd` must be an open descriptor owned by nobody else.
    pub unsafe fn from_raw_fd(fd: RawFd) -> SyncReceiver {
        SyncReceiver {
            file: File::from(OwnedFd::from_raw_fd(fd)),
        }
    }

    pub fn recv<T: DeserializeOwned>(self) -> Result<T> {
        let reader = BufReader::new(self.file);
        serde_json::from_reader(reader).map_err(|err| {
            tracing::error!(?err, "failed to receive message from the sync pipe");
            ChannelError::Deserialize(err)
        })
    }

    pub(crate) fn as_file(&self) -> &File {
        &self.file
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use anyhow::Result;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        id: String,
        root: PathBuf,
    }

    #[test]
    fn test_sync_channel_round_trip() -> Result<()> {
        let (sender, receiver) = sync_channel()?;
        let record = Record {
            id: "sandbox".to_string(),
            root: PathBuf::from("/run/ferrocell/sandbox"),
        };
        sender.send(&record)?;

        let got: Record = receiver.recv()?;
        assert_eq!(got, record);
        Ok(())
    }

    #[test]
    fn test_recv_fails_when_sender_is_dropped() -> Result<()> {
        let (sender, receiver) = sync_channel()?;
        drop(sender);
        assert!(matches!(
            receiver.recv::<Record>(),
            Err(ChannelError::Deserialize(_))
        ));
        Ok(())
    }
}
