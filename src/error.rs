use thiserror::Error;

/// A `Result` whose error defaults to this crate's [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong while loading, profiling, or matching relations.
///
/// Profiling itself can only fail before the search starts; once preconditions hold, the lattice
/// search always runs to completion (or to a configured limit).
#[derive(Debug, Error)]
pub enum Error {
    /// The relation doesn't have the shape the operation needs.
    #[error("precondition violated: {0}")]
    PreconditionViolation(#[from] Precondition),

    /// A column index doesn't exist in the relation it was meant for.
    #[error("column index {index} is out of range for a relation with {columns} columns")]
    InvalidInput {
        /// The offending index.
        index: usize,
        /// How many columns the relation has.
        columns: usize,
    },

    /// Delimited input couldn't be decoded.
    #[error("record {record}: {reason}")]
    Malformed {
        /// The 1-based record number, counting the header.
        record: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// Reading input failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The individual shape requirements behind [`Error::PreconditionViolation`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Precondition {
    /// There are no columns to combine.
    #[error("relation has no columns")]
    NoColumns,

    /// There are no rows to compare.
    #[error("relation has no rows")]
    NoRows,

    /// The number of attribute names disagrees with the number of columns.
    #[error("{attributes} attribute names declared for {columns} columns")]
    AttributeCount {
        /// Declared attribute names.
        attributes: usize,
        /// Columns actually supplied.
        columns: usize,
    },

    /// A column is longer or shorter than the others.
    #[error("column {column} has {found} values, expected {expected}")]
    ColumnLength {
        /// Position of the column.
        column: usize,
        /// Its length.
        found: usize,
        /// The declared row count.
        expected: usize,
    },

    /// A record has the wrong number of fields.
    #[error("record {record} has {found} fields, expected {expected}")]
    RecordLength {
        /// The 1-based record number.
        record: usize,
        /// Fields in that record.
        found: usize,
        /// Fields per record.
        expected: usize,
    },

    /// Row positions wouldn't fit in [`Row`](crate::Row).
    #[error("relation has {rows} rows, more than a position list index can address")]
    TooManyRows {
        /// The row count.
        rows: usize,
    },

    /// A similarity matrix row has the wrong number of entries.
    #[error("similarity matrix row {row} has {found} entries, expected {expected}")]
    MatrixShape {
        /// Position of the row.
        row: usize,
        /// Entries in that row.
        found: usize,
        /// Entries per row.
        expected: usize,
    },

    /// Column positions wouldn't fit in the chosen [`ColumnId`](crate::ColumnId) type.
    #[error("relation has {columns} columns, more than the column id type can address")]
    TooManyColumns {
        /// The column count.
        columns: usize,
    },
}
