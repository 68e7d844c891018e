//! Named-pipe delivery of detection events.
//!
//! A [`PipeFeeder`] creates a FIFO and writes a chunk's bytes into it from a
//! helper thread while the decoder reads the other end. The decoder sees an
//! ordinary path it can open and read sequentially, but cannot seek or stat
//! for a size.

use qdec_core::{ProtocolError, Result};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;

const RELEASE_POLL: Duration = Duration::from_millis(2);

#[derive(Debug)]
pub struct PipeFeeder {
    path: PathBuf,
    handle: Option<JoinHandle<io::Result<()>>>,
}

impl PipeFeeder {
    /// Creates a FIFO at `path` and starts writing `data` into it.
    ///
    /// The writer blocks until a reader opens the pipe.
    pub fn start(path: &Path, data: Vec<u8>) -> Result<Self> {
        mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR)
            .map_err(|e| ProtocolError::resource(path, e))?;
        let target = path.to_path_buf();
        let handle = thread::Builder::new()
            .name("qdec-pipe".into())
            .spawn(move || {
                let mut pipe = OpenOptions::new().write(true).open(&target)?;
                pipe.write_all(&data)?;
                pipe.flush()
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            handle: Some(handle),
        })
    }

    /// Stops feeding and joins the writer thread.
    ///
    /// Must run after the decoder has stopped and before the FIFO is deleted.
    /// A writer still waiting for a reader, or stuck on a full pipe, is
    /// released by briefly opening and closing the read end; it then fails
    /// with a broken pipe, which is reported here.
    pub fn finish(mut self) -> io::Result<()> {
        self.release()
    }

    fn release(&mut self) -> io::Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        while !handle.is_finished() {
            // The writer may not have reached open() yet, so keep retrying.
            let reader = OpenOptions::new()
                .read(true)
                .custom_flags(OFlag::O_NONBLOCK.bits())
                .open(&self.path)?;
            thread::sleep(RELEASE_POLL);
            drop(reader);
        }
        handle
            .join()
            .map_err(|_| io::Error::other("pipe writer panicked"))?
    }
}

impl Drop for PipeFeeder {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            debug!(path = %self.path.display(), "pipe feeder stopped early: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdec_common::BatchShape;
    use qdec_io::stream::ShotReader;
    use tempfile::TempDir;

    #[test]
    fn reader_receives_every_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dets.b8");
        let shape = BatchShape::new(3, 12, 1);
        let feeder = PipeFeeder::start(&path, vec![1, 0, 2, 0, 3, 0]).unwrap();

        let mut reader = ShotReader::open(&path, &shape).unwrap();
        let mut first = Vec::new();
        while let Some(record) = reader.next_record().unwrap() {
            first.push(record[0]);
        }
        reader.finish().unwrap();

        assert_eq!(first, vec![1, 2, 3]);
        feeder.finish().unwrap();
    }

    #[test]
    fn unread_pipe_does_not_hang_the_feeder() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dets.b8");
        let feeder = PipeFeeder::start(&path, vec![0xAA; 1 << 20]).unwrap();
        // Nobody ever opens the read end.
        assert!(feeder.finish().is_err());
    }

    #[test]
    fn partially_read_pipe_is_released() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dets.b8");
        let feeder = PipeFeeder::start(&path, vec![0x55; 1 << 20]).unwrap();

        let mut reader = ShotReader::open(&path, &BatchShape::new(4, 8, 1)).unwrap();
        for _ in 0..4 {
            reader.next_record().unwrap();
        }
        drop(reader);

        assert!(feeder.finish().is_err());
    }
}
