/// Store an enum with `as_str`/`FromStr` as a TEXT column.
macro_rules! sql_text_enum {
    ($ty:ty) => {
        impl rusqlite::types::ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(rusqlite::types::ToSqlOutput::from(self.as_str()))
            }
        }

        impl rusqlite::types::FromSql for $ty {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse::<$ty>()
                    .map_err(|e| rusqlite::types::FromSqlError::Other(e.to_string().into()))
            }
        }
    };
}

pub mod models;
pub mod queries;
pub mod sqlite;

pub use sqlite::Database;

use crate::error::{Error, Result};
use serde::Serialize;

/// One page of a keyset-paginated listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Pass back to fetch the following page. `None` on the last page.
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// Build a page from `limit + 1` fetched rows.
    pub(crate) fn from_rows(mut rows: Vec<T>, limit: usize, id_of: impl Fn(&T) -> i64) -> Self {
        let next_cursor = if rows.len() > limit {
            rows.truncate(limit);
            rows.last().map(|last| encode_cursor(id_of(last)))
        } else {
            None
        };
        Page {
            items: rows,
            next_cursor,
        }
    }
}

const CURSOR_PREFIX: &str = "rk1.";

pub(crate) fn encode_cursor(last_id: i64) -> String {
    format!("{}{:x}", CURSOR_PREFIX, last_id)
}

/// Id after which the next page starts. No cursor means "from the beginning".
pub(crate) fn decode_cursor(cursor: Option<&str>) -> Result<i64> {
    let Some(cursor) = cursor else {
        return Ok(0);
    };
    cursor
        .strip_prefix(CURSOR_PREFIX)
        .and_then(|hex| i64::from_str_radix(hex, 16).ok())
        .ok_or_else(|| Error::validation(format!("invalid page cursor '{}'", cursor)))
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_round_trip() {
        let c = encode_cursor(4242);
        assert_eq!(decode_cursor(Some(&c)).unwrap(), 4242);
        assert_eq!(decode_cursor(None).unwrap(), 0);
        assert!(decode_cursor(Some("garbage")).is_err());
    }

    #[test]
    fn test_page_from_rows() {
        let page = Page::from_rows(vec![1i64, 2, 3], 2, |v| *v);
        assert_eq!(page.items, vec![1, 2]);
        assert_eq!(page.next_cursor, Some(encode_cursor(2)));

        let last = Page::from_rows(vec![1i64, 2], 2, |v| *v);
        assert!(last.next_cursor.is_none());
    }
}
