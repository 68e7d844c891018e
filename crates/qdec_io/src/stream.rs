use qdec_common::BatchShape;
use qdec_core::b8;
use qdec_core::{ProtocolError, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

/// Reads fixed-width b8 records from a file or pipe.
///
/// Knows the record width and shot count up front and never asks the source
/// for its size. Each call blocks until one full record has arrived. A source
/// that closes before delivering every declared record yields a format error
/// instead of a short read.
pub struct ShotReader<R> {
    inner: R,
    record: Vec<u8>,
    remaining: usize,
}

impl ShotReader<BufReader<File>> {
    /// Opens the detection-event stream at `path` for `shape.num_shots`
    /// records of `shape.num_dets` bits.
    ///
    /// Opening a named pipe blocks until a writer connects.
    pub fn open(path: &Path, shape: &BatchShape) -> Result<Self> {
        let file = File::open(path).map_err(|e| ProtocolError::resource(path, e))?;
        Ok(Self::new(BufReader::new(file), shape.num_shots, shape.num_dets))
    }
}

impl<R: Read> ShotReader<R> {
    pub fn new(inner: R, num_shots: usize, bits_per_shot: usize) -> Self {
        Self {
            inner,
            record: vec![0; b8::bytes_per_record(bits_per_shot)],
            remaining: num_shots,
        }
    }

    /// Records not yet read.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Reads the next record, or returns `None` once every declared record
    /// has been consumed.
    pub fn next_record(&mut self) -> Result<Option<&[u8]>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.inner.read_exact(&mut self.record).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                ProtocolError::format(format!(
                    "detection stream ended with {} records still expected",
                    self.remaining
                ))
            } else {
                ProtocolError::Io(e)
            }
        })?;
        self.remaining -= 1;
        Ok(Some(&self.record))
    }

    /// Confirms the source is exhausted after the last declared record.
    ///
    /// On a pipe this waits for the writer to close its end.
    pub fn finish(mut self) -> Result<()> {
        if self.remaining != 0 {
            return Err(ProtocolError::format(format!(
                "{} records left unread",
                self.remaining
            )));
        }
        let mut probe = [0u8; 1];
        loop {
            match self.inner.read(&mut probe) {
                Ok(0) => return Ok(()),
                Ok(_) => {
                    return Err(ProtocolError::format(
                        "detection stream carries more records than declared",
                    ));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(ProtocolError::Io(e)),
            }
        }
    }
}

/// Writes fixed-width b8 prediction records in shot order.
pub struct ShotWriter<W: Write> {
    inner: W,
    bits_per_shot: usize,
    record: Vec<u8>,
    expected: usize,
    written: usize,
}

impl ShotWriter<BufWriter<File>> {
    /// Creates (or truncates) the prediction file at `path` for
    /// `shape.num_shots` records of `shape.num_obs` bits.
    pub fn create(path: &Path, shape: &BatchShape) -> Result<Self> {
        let file = File::create(path).map_err(|e| ProtocolError::resource(path, e))?;
        Ok(Self::new(BufWriter::new(file), shape.num_shots, shape.num_obs))
    }
}

impl<W: Write> ShotWriter<W> {
    pub fn new(inner: W, num_shots: usize, bits_per_shot: usize) -> Self {
        Self {
            inner,
            bits_per_shot,
            record: vec![0; b8::bytes_per_record(bits_per_shot)],
            expected: num_shots,
            written: 0,
        }
    }

    /// Appends one already-packed record.
    pub fn write_record(&mut self, record: &[u8]) -> Result<()> {
        if record.len() != self.record.len() {
            return Err(ProtocolError::format(format!(
                "prediction record must be {} bytes, got {}",
                self.record.len(),
                record.len()
            )));
        }
        self.check_room()?;
        self.inner.write_all(record)?;
        self.written += 1;
        Ok(())
    }

    /// Appends one record holding the low observable bits of `mask`.
    pub fn write_mask(&mut self, mask: u64) -> Result<()> {
        self.check_room()?;
        b8::pack_mask(mask, self.bits_per_shot, &mut self.record)?;
        self.inner.write_all(&self.record)?;
        self.written += 1;
        Ok(())
    }

    /// Appends one record from unpacked bits.
    pub fn write_bits(&mut self, bits: &[bool]) -> Result<()> {
        let packed = b8::encode(bits, self.bits_per_shot)?;
        self.write_record(&packed)
    }

    fn check_room(&self) -> Result<()> {
        if self.written >= self.expected {
            return Err(ProtocolError::format(format!(
                "attempted to write more than {} prediction records",
                self.expected
            )));
        }
        Ok(())
    }

    /// Flushes the stream after checking every declared record was written.
    pub fn finish(mut self) -> Result<W> {
        if self.written != self.expected {
            return Err(ProtocolError::format(format!(
                "wrote {} of {} prediction records",
                self.written, self.expected
            )));
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Writes `shape.num_shots` all-zero prediction records to `path`.
///
/// Used when a batch has no detectors: there is nothing to decode, so every
/// observable is predicted unflipped.
pub fn write_zero_predictions(path: &Path, shape: &BatchShape) -> Result<()> {
    let mut writer = ShotWriter::create(path, shape)?;
    for _ in 0..shape.num_shots {
        writer.write_mask(0)?;
    }
    writer.finish()?;
    Ok(())
}
