//! Execution restrictions a command may request

use bitflags::bitflags;

bitflags! {
    /// Restrictions on how a command's results are produced and consumed.
    ///
    /// The behavior sent with a physical batch is the intersection of the
    /// behaviors of every command in it; each command's reader still enforces
    /// its own restrictions on its slice.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CommandBehavior: u32 {
        /// Only the first result set is consumed.
        const SINGLE_RESULT = 1 << 0;
        /// Only column metadata is produced (`SET FMTONLY ON`).
        const SCHEMA_ONLY = 1 << 1;
        /// Key column metadata is produced (`SET NO_BROWSETABLE ON`).
        const KEY_INFO = 1 << 2;
        /// Only the first row is consumed.
        const SINGLE_ROW = 1 << 3;
        /// Columns are read in order, large values streamed.
        const SEQUENTIAL_ACCESS = 1 << 4;
    }
}

impl CommandBehavior {
    /// The subset a batch reader enforces
    pub const READER_RESTRICTIONS: Self = Self::SINGLE_RESULT
        .union(Self::SCHEMA_ONLY)
        .union(Self::KEY_INFO)
        .union(Self::SINGLE_ROW);

    pub fn is_single_row(&self) -> bool {
        self.contains(Self::SINGLE_ROW)
    }

    pub fn is_single_result(&self) -> bool {
        self.contains(Self::SINGLE_RESULT)
    }
}
