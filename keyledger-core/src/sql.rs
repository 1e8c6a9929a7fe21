//! Row decoding helpers shared by the ledger components.

use rusqlite::Row;
use rusqlite::types::Type;
use std::str::FromStr;

/// Reads a TEXT column and parses it into a typed identifier.
pub(crate) fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Reads an optional TEXT column and parses it when present.
pub(crate) fn parsed_opt<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

/// Reads an INTEGER column that must fit in a `u32`.
pub(crate) fn count(row: &Row<'_>, idx: usize) -> rusqlite::Result<u32> {
    let raw: i64 = row.get(idx)?;
    u32::try_from(raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}
