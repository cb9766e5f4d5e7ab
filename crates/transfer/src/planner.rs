//! Splits a transfer into parts.

use std::iter::FusedIterator;

use chunkferry_protocol::Part;

use crate::TransferError;

/// Splits `total_size` bytes into parts of at most `part_size` bytes.
///
/// The returned [`PartPlan`] is lazy: parts are computed on demand, so a
/// multi-terabyte object does not materialize millions of descriptors.
/// A zero-byte transfer still yields one zero-length part so that the
/// coordinator has something to finalize.
pub fn plan(total_size: u64, part_size: u64) -> Result<PartPlan, TransferError> {
    if part_size == 0 {
        return Err(TransferError::InvalidPartSize(part_size));
    }
    let count = if total_size == 0 {
        1
    } else {
        total_size.div_ceil(part_size)
    };
    let count = u32::try_from(count).map_err(|_| TransferError::TooManyParts {
        total_size,
        part_size,
    })?;

    Ok(PartPlan {
        total_size,
        part_size,
        count,
        next: 0,
    })
}

/// Restartable, lazily evaluated sequence of pending parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartPlan {
    total_size: u64,
    part_size: u64,
    count: u32,
    next: u32,
}

impl PartPlan {
    /// Total number of parts (independent of iteration state).
    pub fn part_count(&self) -> u32 {
        self.count
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// Computes the part at `index` directly.
    pub fn get(&self, index: u32) -> Option<Part> {
        if index >= self.count {
            return None;
        }
        let offset = u64::from(index) * self.part_size;
        let length = self.part_size.min(self.total_size - offset);
        Some(Part::new(index, offset, length))
    }

    /// Returns a fresh iterator positioned at the first part.
    pub fn restart(&self) -> Self {
        Self {
            next: 0,
            ..self.clone()
        }
    }
}

impl Iterator for PartPlan {
    type Item = Part;

    fn next(&mut self) -> Option<Part> {
        let part = self.get(self.next)?;
        self.next += 1;
        Some(part)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.count - self.next.min(self.count)) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PartPlan {}

impl FusedIterator for PartPlan {}
