use serde::Serialize;
use tracing::{debug, info};

use crate::disk::DiskImage;
use crate::error::Result;
use crate::search::{find_earliest, find_pattern_from};
use crate::signatures::CarveSignature;
use crate::types::FileKind;

/// A header-to-footer byte range recovered by the windowed carver
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CarvedFile {
    pub kind: FileKind,
    pub start_offset: u64,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl CarvedFile {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug)]
enum CarverState {
    Searching,
    Capturing {
        start_offset: u64,
        buffer: Vec<u8>,
        /// Buffer position the next footer search starts from
        scanned: usize,
    },
}

/// Two-state header/footer carver for one file type.
///
/// Only one capture is active at a time; a capture that never sees its
/// footer is dropped at end of input.
#[derive(Debug)]
pub struct WindowedCarver {
    signature: CarveSignature,
    state: CarverState,
    carved: Vec<CarvedFile>,
}

impl WindowedCarver {
    pub fn new(signature: CarveSignature) -> Self {
        Self {
            signature,
            state: CarverState::Searching,
            carved: Vec::new(),
        }
    }

    pub fn jpeg() -> Self {
        Self::new(CarveSignature::jpeg())
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self.state, CarverState::Capturing { .. })
    }

    /// Bytes buffered by the active capture
    pub fn pending_len(&self) -> usize {
        match &self.state {
            CarverState::Capturing { buffer, .. } => buffer.len(),
            CarverState::Searching => 0,
        }
    }

    pub fn carved_files(&self) -> &[CarvedFile] {
        &self.carved
    }

    /// Feed the next block of the stream
    pub fn process_block(&mut self, offset: u64, data: &[u8]) {
        let mut cursor = 0usize;

        if let CarverState::Capturing { buffer, .. } = &mut self.state {
            let appended_at = buffer.len();
            buffer.extend_from_slice(data);
            match self.close_on_footer() {
                // the footer ends inside this block; keep searching after it
                Some(end) => cursor = end - appended_at,
                None => return,
            }
        }

        while cursor < data.len() {
            let headers = &self.signature.headers;
            let Some((pos, _)) = find_earliest(&data[cursor..], headers) else {
                return;
            };

            let start = cursor + pos;
            self.state = CarverState::Capturing {
                start_offset: offset + start as u64,
                buffer: data[start..].to_vec(),
                scanned: 0,
            };

            match self.close_on_footer() {
                Some(end) => cursor = start + end,
                None => return,
            }
        }
    }

    /// Emit the capture if its buffer now holds a footer. Returns the end of
    /// the emitted file within the buffer.
    fn close_on_footer(&mut self) -> Option<usize> {
        let footer = self.signature.footer;
        let state = std::mem::replace(&mut self.state, CarverState::Searching);

        let CarverState::Capturing {
            start_offset,
            mut buffer,
            scanned,
        } = state
        else {
            return None;
        };

        match find_pattern_from(&buffer, footer, scanned) {
            Some(idx) => {
                let end = idx + footer.len();
                buffer.truncate(end);
                debug!(
                    kind = %self.signature.kind,
                    start_offset,
                    size = end,
                    "carved file closed on footer"
                );
                self.carved.push(CarvedFile {
                    kind: self.signature.kind,
                    start_offset,
                    data: buffer,
                });
                Some(end)
            }
            None => {
                // a footer may straddle the next append
                let scanned = buffer.len().saturating_sub(footer.len().saturating_sub(1));
                self.state = CarverState::Capturing {
                    start_offset,
                    buffer,
                    scanned,
                };
                None
            }
        }
    }

    /// End of input; an unterminated capture is discarded
    pub fn finish(self) -> Vec<CarvedFile> {
        if let CarverState::Capturing {
            start_offset,
            buffer,
            ..
        } = &self.state
        {
            debug!(
                kind = %self.signature.kind,
                start_offset,
                buffered = buffer.len(),
                "dropping capture without footer"
            );
        }
        self.carved
    }
}

/// Carve a whole image sequentially, including a trailing partial block
pub fn carve_image(disk: &DiskImage, signature: CarveSignature) -> Result<Vec<CarvedFile>> {
    let kind = signature.kind;
    let mut carver = WindowedCarver::new(signature);

    for block in disk.scan_blocks() {
        let block = block?;
        carver.process_block(block.offset, &block.data);
    }

    let tail = disk.read_block(disk.block_count())?;
    if !tail.is_empty() {
        carver.process_block(tail.offset, &tail.data);
    }

    let carved = carver.finish();
    info!(kind = %kind, files = carved.len(), "signature carving finished");
    Ok(carved)
}
