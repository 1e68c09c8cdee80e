use crate::{Error, Precondition, Result, Row};
use csv_core::{ReadFieldResult, ReaderBuilder};
use lasso::{Rodeo, RodeoReader, Spur};
use std::fs::File;
use std::io;
use std::path::Path;
use std::str;

/// An interned cell value. Two cells of the same relation hold equal strings exactly when their
/// symbols are equal.
pub type Symbol = Spur;

/// Settings for [`Relation::read`] and [`Relation::open`].
#[derive(Clone, Debug)]
pub struct ReadOptions {
    delimiter: Option<u8>,
    has_header: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            delimiter: None,
            has_header: true,
        }
    }
}

impl ReadOptions {
    /// Uses `delimiter` between fields. Without this, fields are separated by commas, or by tabs
    /// for `.tsv` files opened with [`Relation::open`].
    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = Some(delimiter);
        self
    }

    /// Whether the first record names the attributes. If not, attributes are named `column_1`,
    /// `column_2`, and so on.
    pub fn has_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }
}

/// A named table of string cells, stored column by column.
///
/// Cells are interned when the relation is built, so grouping rows by value hashes small integer
/// symbols rather than strings. A relation never changes once built.
pub struct Relation {
    name: String,
    attributes: Vec<String>,
    columns: Vec<Vec<Symbol>>,
    rows: usize,
    values: RodeoReader<Symbol>,
}

/// Accumulates records into interned columns.
struct Builder {
    attributes: Vec<String>,
    columns: Vec<Vec<Symbol>>,
    values: Rodeo<Symbol>,
}

impl Builder {
    fn new(attributes: Vec<String>) -> Self {
        Builder {
            columns: vec![Vec::new(); attributes.len()],
            attributes,
            values: Rodeo::new(),
        }
    }

    fn push_record<S: AsRef<str>>(
        &mut self,
        record: usize,
        fields: impl IntoIterator<Item = S>,
    ) -> Result<()> {
        let expected = self.columns.len();
        let mut found = 0;
        for field in fields {
            let symbol = self.values.get_or_intern(field.as_ref());
            if let Some(column) = self.columns.get_mut(found) {
                column.push(symbol);
            }
            found += 1;
        }
        if found != expected {
            return Err(Precondition::RecordLength {
                record,
                found,
                expected,
            }
            .into());
        }
        Ok(())
    }

    fn finish(self, name: String) -> Result<Relation> {
        Relation::assemble(name, self.attributes, self.columns, self.values)
    }
}

/// Splits a record buffer at the recorded field ends.
fn split_fields<'a>(record: &'a str, ends: &'a [usize]) -> impl Iterator<Item = &'a str> + 'a {
    let starts = std::iter::once(0).chain(ends.iter().copied());
    starts
        .zip(ends.iter())
        .map(move |(start, &end)| &record[start..end])
}

impl Relation {
    fn assemble(
        name: String,
        attributes: Vec<String>,
        columns: Vec<Vec<Symbol>>,
        values: Rodeo<Symbol>,
    ) -> Result<Relation> {
        if attributes.len() != columns.len() {
            return Err(Precondition::AttributeCount {
                attributes: attributes.len(),
                columns: columns.len(),
            }
            .into());
        }

        let rows = columns.first().map_or(0, Vec::len);
        if let Some((column, found)) = columns
            .iter()
            .map(Vec::len)
            .enumerate()
            .find(|&(_, len)| len != rows)
        {
            return Err(Precondition::ColumnLength {
                column,
                found,
                expected: rows,
            }
            .into());
        }

        if rows > Row::MAX as usize {
            return Err(Precondition::TooManyRows { rows }.into());
        }

        Ok(Relation {
            name,
            attributes,
            columns,
            rows,
            values: values.into_reader(),
        })
    }

    /// Builds a relation from column-major data: one sequence of cells per attribute.
    ///
    /// Fails if the number of columns doesn't match the number of attributes, or if the columns
    /// don't all have the same length.
    pub fn from_columns<I, S>(
        name: impl Into<String>,
        attributes: Vec<String>,
        columns: impl IntoIterator<Item = I>,
    ) -> Result<Relation>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut values = Rodeo::new();
        let columns = columns
            .into_iter()
            .map(|column| {
                column
                    .into_iter()
                    .map(|cell| values.get_or_intern(cell.as_ref()))
                    .collect()
            })
            .collect();
        Relation::assemble(name.into(), attributes, columns, values)
    }

    /// Builds a relation from row-major data.
    ///
    /// Fails if any row doesn't have exactly one cell per attribute.
    ///
    /// ```
    /// use uccprofile::{Error, Precondition, Relation};
    ///
    /// let ragged = Relation::from_rows("r", vec!["a".into(), "b".into()], vec![vec!["1"]]);
    /// assert!(matches!(
    ///     ragged,
    ///     Err(Error::PreconditionViolation(Precondition::RecordLength { record: 1, found: 1, expected: 2 }))
    /// ));
    /// ```
    pub fn from_rows<I, S>(
        name: impl Into<String>,
        attributes: Vec<String>,
        rows: impl IntoIterator<Item = I>,
    ) -> Result<Relation>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = Builder::new(attributes);
        for (record, row) in rows.into_iter().enumerate() {
            builder.push_record(record + 1, row)?;
        }
        builder.finish(name.into())
    }

    /// Reads delimited text, such as CSV or TSV, into a relation called `name`.
    ///
    /// Quoting follows the usual CSV conventions. Every record must have as many fields as the
    /// first one. Cells must be valid UTF-8.
    ///
    /// ```
    /// use uccprofile::{ReadOptions, Relation};
    ///
    /// let data = "id,name\n1,\"Smith, J\"\n2,Doe\n";
    /// let relation = Relation::read("people", data.as_bytes(), &ReadOptions::default())?;
    /// assert_eq!(relation.attributes(), &["id", "name"]);
    /// assert_eq!(relation.row_count(), 2);
    /// assert_eq!(relation.value(0, 1), Some("Smith, J"));
    /// # Ok::<(), uccprofile::Error>(())
    /// ```
    pub fn read<R: io::Read>(
        name: impl Into<String>,
        mut input: R,
        options: &ReadOptions,
    ) -> Result<Relation> {
        let mut inputbuf = [0; 16384];
        let mut fieldbuf = vec![0; 1024];
        let mut fieldlen = 0;

        // Reuse the same heap allocations for every record.
        let mut record = String::new();
        let mut ends = Vec::new();
        let mut records = 0;

        let mut builder: Option<Builder> = None;
        let mut csv = ReaderBuilder::new()
            .delimiter(options.delimiter.unwrap_or(b','))
            .build();

        loop {
            let read = input.read(&mut inputbuf)?;
            let mut bytes = &inputbuf[..read];
            loop {
                let (result, nin, nout) = csv.read_field(bytes, &mut fieldbuf[fieldlen..]);
                bytes = &bytes[nin..];
                fieldlen += nout;
                match result {
                    ReadFieldResult::InputEmpty => break,
                    ReadFieldResult::OutputFull => {
                        let len = fieldbuf.len();
                        fieldbuf.resize(len * 2, 0);
                    }
                    ReadFieldResult::Field { record_end } => {
                        let field =
                            str::from_utf8(&fieldbuf[..fieldlen]).map_err(|e| Error::Malformed {
                                record: records + 1,
                                reason: e.to_string(),
                            })?;
                        record.push_str(field);
                        ends.push(record.len());
                        fieldlen = 0;

                        if record_end {
                            records += 1;
                            let fields = split_fields(&record, &ends);
                            if let Some(builder) = builder.as_mut() {
                                builder.push_record(records, fields)?;
                            } else if options.has_header {
                                builder = Some(Builder::new(fields.map(str::to_owned).collect()));
                            } else {
                                let names = (1..=ends.len())
                                    .map(|i| format!("column_{}", i))
                                    .collect();
                                let mut first = Builder::new(names);
                                first.push_record(records, fields)?;
                                builder = Some(first);
                            }
                            record.clear();
                            ends.clear();
                        }
                    }
                    ReadFieldResult::End => {
                        let builder = builder.unwrap_or_else(|| Builder::new(Vec::new()));
                        return builder.finish(name.into());
                    }
                }
            }
        }
    }

    /// Opens and reads a delimited text file, naming the relation after the file's stem.
    ///
    /// Files ending in `.tsv` are read as tab-separated unless `options` sets a delimiter.
    pub fn open(path: impl AsRef<Path>, options: &ReadOptions) -> Result<Relation> {
        let path = path.as_ref();
        let name = path.file_stem().map_or_else(
            || path.display().to_string(),
            |stem| stem.to_string_lossy().into_owned(),
        );

        let mut options = options.clone();
        let is_tsv = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("tsv"));
        if options.delimiter.is_none() && is_tsv {
            options.delimiter = Some(b'\t');
        }

        Relation::read(name, File::open(path)?, &options)
    }

    /// The relation's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The attribute names, one per column.
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// The name of the attribute at `column`.
    pub fn attribute(&self, column: usize) -> Option<&str> {
        self.attributes.get(column).map(String::as_str)
    }

    /// The number of rows.
    pub fn row_count(&self) -> usize {
        self.rows
    }

    /// The number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// The interned cells of `column`, in row order.
    ///
    /// # Panics
    ///
    /// This method panics if `column` is out of range.
    pub fn column(&self, column: usize) -> &[Symbol] {
        &self.columns[column]
    }

    /// The cells of `column` as strings, in row order.
    ///
    /// # Panics
    ///
    /// This method panics if `column` is out of range.
    pub fn values(&self, column: usize) -> impl Iterator<Item = &str> + '_ {
        self.columns[column]
            .iter()
            .map(move |symbol| self.values.resolve(symbol))
    }

    /// The cell at `row` and `column`, if both exist.
    pub fn value(&self, row: usize, column: usize) -> Option<&str> {
        let symbol = self.columns.get(column)?.get(row)?;
        Some(self.values.resolve(symbol))
    }
}

impl std::fmt::Debug for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relation")
            .field("name", &self.name)
            .field("attributes", &self.attributes)
            .field("rows", &self.rows)
            .finish()
    }
}
