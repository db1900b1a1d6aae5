use crate::row::Row;
use mvcckv_core::{Value, Version};

/// A single snapshot read against one row. Read-only operations never
/// allocate a version; they just copy the coordinator's current sequence
/// value as their snapshot.
pub struct ReadOp<'a> {
    row: &'a Row,
    snapshot: Version,
}

impl<'a> ReadOp<'a> {
    pub(crate) fn new(row: &'a Row, snapshot: Version) -> Self {
        Self { row, snapshot }
    }

    pub fn read(&self) -> Value {
        self.row.read(self.snapshot, false)
    }
}

/// A snapshot read that can be retargeted to a different row without
/// losing its snapshot version -- the building block for snapshot-
/// consistent iteration over the index, where [`crate::table::Table::Iter`]
/// advances the underlying index position and re-points the same
/// `StreamReadOp` at each row in turn.
pub struct StreamReadOp<'a> {
    row: &'a Row,
    snapshot: Version,
}

impl<'a> StreamReadOp<'a> {
    pub(crate) fn new(row: &'a Row, snapshot: Version) -> Self {
        Self { row, snapshot }
    }

    pub fn read(&self) -> Value {
        self.row.read(self.snapshot, false)
    }

    /// Retargets this operation to `row`, keeping the same snapshot.
    pub(crate) fn retarget(&mut self, row: &'a Row) {
        self.row = row;
    }
}
