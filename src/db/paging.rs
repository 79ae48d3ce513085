//! Page-at-a-time reads over a SELECT.
//!
//! The reader counts the matching rows once, clamps the requested page to
//! the available range and loads one page, either with the dialect's native
//! LIMIT/OFFSET clause or by skipping rows client side.

use crate::db::helper::DbHelper;
use crate::error::DbResult;
use crate::mapping::{DbEntity, to_entity_list};
use crate::models::{DbRow, FromDbValue};
use crate::sql::ConditionBuilder;
use tracing::debug;

pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// How a page is cut out of the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PagingStrategy {
    /// Native clause when the dialect has one, otherwise client side.
    #[default]
    Auto,
    /// Always skip rows client side.
    Generic,
    /// Require the native clause; falls back to client side without one.
    Native,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingState {
    Idle,
    CountComputed,
    PageLoaded,
}

pub struct PagingReader<'h> {
    helper: &'h mut DbHelper,
    select: String,
    condition: ConditionBuilder,
    page_number: u64,
    page_size: u64,
    record_count: Option<u64>,
    strategy: PagingStrategy,
    state: PagingState,
}

impl<'h> PagingReader<'h> {
    pub(crate) fn new(helper: &'h mut DbHelper, select: String) -> Self {
        let condition = helper.condition_builder();
        Self {
            helper,
            select,
            condition,
            page_number: 1,
            page_size: DEFAULT_PAGE_SIZE,
            record_count: None,
            strategy: PagingStrategy::Auto,
            state: PagingState::Idle,
        }
    }

    pub fn select(&self) -> &str {
        &self.select
    }

    pub fn set_select(&mut self, select: impl Into<String>) -> &mut Self {
        self.select = select.into();
        self.invalidate();
        self
    }

    /// Mutable access to the WHERE/ORDER BY builder. Forgets the row count.
    pub fn condition(&mut self) -> &mut ConditionBuilder {
        self.invalidate();
        &mut self.condition
    }

    pub fn set_condition(&mut self, condition: ConditionBuilder) -> &mut Self {
        self.condition = condition;
        self.invalidate();
        self
    }

    pub fn page_number(&self) -> u64 {
        self.page_number
    }

    /// 1-based. Clamped to the page count once the row count is known.
    pub fn set_page_number(&mut self, page: u64) -> &mut Self {
        self.page_number = page.max(1);
        self.clamp_page();
        self
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn set_page_size(&mut self, size: u64) -> &mut Self {
        self.page_size = size.max(1);
        self.clamp_page();
        self
    }

    pub fn strategy(&self) -> PagingStrategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: PagingStrategy) -> &mut Self {
        self.strategy = strategy;
        self
    }

    pub fn state(&self) -> PagingState {
        self.state
    }

    pub fn record_count(&self) -> Option<u64> {
        self.record_count
    }

    /// Use a row count known from elsewhere instead of counting.
    pub fn set_record_count(&mut self, count: u64) -> &mut Self {
        self.record_count = Some(count);
        self.state = PagingState::CountComputed;
        self.clamp_page();
        self
    }

    /// Number of pages; at least one, also for an empty result.
    pub fn page_count(&self) -> Option<u64> {
        self.record_count.map(|count| page_count(count, self.page_size))
    }

    /// Count matching rows once; later calls return the cached count.
    pub async fn init_page_count(&mut self) -> DbResult<u64> {
        if let Some(count) = self.record_count {
            return Ok(count);
        }

        let where_text = self.condition.condition();
        let sql = count_sql(&self.select, &where_text);
        let value = self
            .helper
            .create_command(sql)
            .with_parameters(self.condition.parameters().clone())
            .execute_scalar()
            .await?;
        let count = match value {
            Some(v) => u64::try_from(i64::from_db_value(v).unwrap_or(0)).unwrap_or(0),
            None => 0,
        };

        debug!(count, "Paging row count computed");
        self.set_record_count(count);
        Ok(count)
    }

    /// Load the current page as entities.
    pub async fn read<T: DbEntity>(&mut self) -> DbResult<Vec<T>> {
        let rows = self.read_rows().await?;
        Ok(to_entity_list::<T>(rows))
    }

    /// Load the current page.
    ///
    /// The count and the page query share one connection. A connection
    /// opened for this read is released afterwards unless the helper keeps
    /// it; one that was already open stays open.
    pub async fn read_rows(&mut self) -> DbResult<Vec<DbRow>> {
        let open_before = self.helper.open_slots();
        let keep = self.helper.keep_connection();
        self.helper.set_keep_connection(true);
        let result = self.read_page().await;
        self.helper.set_keep_connection(keep);
        self.helper.release_sessions_opened_since(&open_before);
        result
    }

    async fn read_page(&mut self) -> DbResult<Vec<DbRow>> {
        let count = self.init_page_count().await?;
        if count == 0 {
            self.state = PagingState::PageLoaded;
            return Ok(Vec::new());
        }

        let offset = (self.page_number - 1) * self.page_size;
        let mut sql = format!("{}{}", self.select.trim_end(), self.condition.to_clause());
        let params = self.condition.parameters().clone();

        let native = match self.strategy {
            PagingStrategy::Generic => None,
            PagingStrategy::Auto | PagingStrategy::Native => {
                self.helper.dialect().paging_clause(offset, self.page_size)
            }
        };

        let rows = match native {
            Some(clause) => {
                sql.push_str(&clause);
                self.helper
                    .create_command(sql)
                    .with_parameters(params)
                    .execute_rows()
                    .await?
            }
            None => {
                if self.strategy == PagingStrategy::Native {
                    debug!("Dialect has no native paging; skipping rows client side");
                }
                self.helper
                    .create_command(sql)
                    .with_parameters(params)
                    .execute_row_range(offset as usize, Some(self.page_size as usize))
                    .await?
            }
        };

        self.state = PagingState::PageLoaded;
        debug!(
            page = self.page_number,
            page_size = self.page_size,
            rows = rows.len(),
            "Page loaded"
        );
        Ok(rows)
    }

    fn invalidate(&mut self) {
        self.record_count = None;
        self.state = PagingState::Idle;
    }

    fn clamp_page(&mut self) {
        if let Some(pages) = self.page_count() {
            self.page_number = self.page_number.clamp(1, pages);
        }
    }
}

impl std::fmt::Debug for PagingReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagingReader")
            .field("select", &self.select)
            .field("page_number", &self.page_number)
            .field("page_size", &self.page_size)
            .field("record_count", &self.record_count)
            .field("strategy", &self.strategy)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

pub fn page_count(record_count: u64, page_size: u64) -> u64 {
    let size = page_size.max(1);
    record_count.div_ceil(size).max(1)
}

/// COUNT(*) statement for `select` filtered by `where_text`.
///
/// A plain SELECT has its column list replaced by `COUNT(*)`. Statements
/// with GROUP BY or DISTINCT, or that do not start with SELECT, are wrapped
/// in a derived table instead.
pub fn count_sql(select: &str, where_text: &str) -> String {
    let select = select.trim();
    let where_part = if where_text.trim().is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", where_text.trim())
    };

    let rewritable = starts_with_keyword(select, "SELECT")
        && !has_distinct(select)
        && !contains_phrase(select, "GROUP BY")
        && !contains_phrase(where_text, "GROUP BY");
    if rewritable {
        if let Some(from) = find_top_level_from(select) {
            return format!("SELECT COUNT(*) {}{}", &select[from..], where_part);
        }
    }
    format!("SELECT COUNT(*) FROM ({}{}) AS _tb1", select, where_part)
}

fn starts_with_keyword(text: &str, keyword: &str) -> bool {
    let Some(head) = text.get(..keyword.len()) else {
        return false;
    };
    head.eq_ignore_ascii_case(keyword)
        && !text[keyword.len()..]
            .chars()
            .next()
            .is_some_and(is_word_char)
}

fn has_distinct(select: &str) -> bool {
    select
        .split_whitespace()
        .nth(1)
        .is_some_and(|word| word.eq_ignore_ascii_case("DISTINCT"))
}

fn contains_phrase(text: &str, phrase: &str) -> bool {
    let normalized = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase();
    normalized.contains(phrase)
}

/// Byte offset of the first `FROM` outside parentheses and quotes.
fn find_top_level_from(select: &str) -> Option<usize> {
    let bytes = select.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' | b'`' => quote = Some(b),
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b'f' | b'F' if depth == 0 => {
                let word = select.get(i..i + 4);
                let before_ok = i == 0 || !is_word_byte(bytes[i - 1]);
                let after_ok = bytes.get(i + 4).is_none_or(|b| !is_word_byte(*b));
                if word.is_some_and(|w| w.eq_ignore_ascii_case("FROM")) && before_ok && after_ok {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_count() {
        assert_eq!(page_count(0, 10), 1);
        assert_eq!(page_count(10, 10), 1);
        assert_eq!(page_count(11, 10), 2);
        assert_eq!(page_count(25, 10), 3);
        assert_eq!(page_count(5, 0), 5);
    }

    #[test]
    fn test_count_sql_rewrites_column_list() {
        assert_eq!(
            count_sql("SELECT a,b FROM t", "x=1"),
            "SELECT COUNT(*) FROM t WHERE x=1"
        );
        assert_eq!(
            count_sql("select a, b from t", ""),
            "SELECT COUNT(*) from t"
        );
    }

    #[test]
    fn test_count_sql_skips_nested_from() {
        assert_eq!(
            count_sql("SELECT a, (SELECT COUNT(*) FROM u WHERE u.id=t.id) AS n FROM t", ""),
            "SELECT COUNT(*) FROM t"
        );
        assert_eq!(
            count_sql("SELECT EXTRACT(YEAR FROM d) AS y, 'from' AS f FROM t", ""),
            "SELECT COUNT(*) FROM t"
        );
    }

    #[test]
    fn test_count_sql_wraps_grouped_and_distinct() {
        assert_eq!(
            count_sql("SELECT a FROM t GROUP BY a", ""),
            "SELECT COUNT(*) FROM (SELECT a FROM t GROUP BY a) AS _tb1"
        );
        assert_eq!(
            count_sql("SELECT DISTINCT a FROM t", "b=2"),
            "SELECT COUNT(*) FROM (SELECT DISTINCT a FROM t WHERE b=2) AS _tb1"
        );
        assert_eq!(
            count_sql("WITH x AS (SELECT 1 AS a) SELECT a FROM x", ""),
            "SELECT COUNT(*) FROM (WITH x AS (SELECT 1 AS a) SELECT a FROM x) AS _tb1"
        );
    }

    #[test]
    fn test_column_named_like_from_is_not_keyword() {
        assert_eq!(
            count_sql("SELECT fromdate, date_from FROM t", ""),
            "SELECT COUNT(*) FROM t"
        );
    }
}
