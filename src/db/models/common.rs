//! Pagination and dynamic filter helpers shared by the list queries.

use serde::Serialize;
use sqlx::query::{QueryAs, QueryScalar};
use sqlx::sqlite::{Sqlite, SqliteArguments};

pub const DEFAULT_PAGE_SIZE: i64 = 25;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub pages: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

/// Normalized page request: 1-indexed page and a clamped page size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub limit: i64,
}

impl PageRequest {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Saturates for absurd page numbers; the query then returns no rows
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }

    pub fn paginate<T>(&self, items: Vec<T>, total: i64) -> Paginated<T> {
        let pages = (total + self.limit - 1) / self.limit;
        Paginated {
            items,
            pagination: Pagination {
                page: self.page,
                limit: self.limit,
                total,
                pages,
            },
        }
    }
}

/// Which owner rows a caller may see
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerScope {
    Unrestricted,
    OwnedBy(i64),
}

#[derive(Debug, Clone)]
enum SqlArg {
    Int(i64),
    Text(String),
}

/// Parameterized WHERE clause built from optional filters.
///
/// Column expressions are always static strings; user input only ever
/// reaches the statement as a bound argument.
#[derive(Debug, Default)]
pub(crate) struct Filter {
    conditions: Vec<&'static str>,
    args: Vec<SqlArg>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Condition without bound arguments
    pub fn raw(&mut self, condition: &'static str) -> &mut Self {
        self.conditions.push(condition);
        self
    }

    pub fn int(&mut self, condition: &'static str, value: i64) -> &mut Self {
        self.conditions.push(condition);
        self.args.push(SqlArg::Int(value));
        self
    }

    pub fn text(&mut self, condition: &'static str, value: impl Into<String>) -> &mut Self {
        self.conditions.push(condition);
        self.args.push(SqlArg::Text(value.into()));
        self
    }

    /// Same text bound to every `?` in the condition
    pub fn text_repeated(
        &mut self,
        condition: &'static str,
        value: &str,
        times: usize,
    ) -> &mut Self {
        self.conditions.push(condition);
        for _ in 0..times {
            self.args.push(SqlArg::Text(value.to_string()));
        }
        self
    }

    pub fn scope(&mut self, column: &'static str, scope: OwnerScope) -> &mut Self {
        if let OwnerScope::OwnedBy(user_id) = scope {
            self.int(column, user_id);
        }
        self
    }

    pub fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.conditions.join(" AND "))
        }
    }

    pub fn bind_as<'q, O>(
        &'q self,
        mut query: QueryAs<'q, Sqlite, O, SqliteArguments<'q>>,
    ) -> QueryAs<'q, Sqlite, O, SqliteArguments<'q>> {
        for arg in &self.args {
            query = match arg {
                SqlArg::Int(v) => query.bind(*v),
                SqlArg::Text(s) => query.bind(s.as_str()),
            };
        }
        query
    }

    pub fn bind_scalar<'q, O>(
        &'q self,
        mut query: QueryScalar<'q, Sqlite, O, SqliteArguments<'q>>,
    ) -> QueryScalar<'q, Sqlite, O, SqliteArguments<'q>> {
        for arg in &self.args {
            query = match arg {
                SqlArg::Int(v) => query.bind(*v),
                SqlArg::Text(s) => query.bind(s.as_str()),
            };
        }
        query
    }
}

/// `%term%` pattern with LIKE wildcards in the term escaped (use `ESCAPE '\'`)
pub fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_clamps() {
        let p = PageRequest::new(Some(0), Some(1000));
        assert_eq!(p.page, 1);
        assert_eq!(p.limit, MAX_PAGE_SIZE);

        let p = PageRequest::new(None, None);
        assert_eq!(p.limit, DEFAULT_PAGE_SIZE);
        assert_eq!(p.offset(), 0);

        let p = PageRequest::new(Some(3), Some(10));
        assert_eq!(p.offset(), 20);
    }

    #[test]
    fn test_huge_page_offset_saturates() {
        let p = PageRequest::new(Some(i64::MAX), Some(MAX_PAGE_SIZE));
        assert_eq!(p.page, i64::MAX);
        assert_eq!(p.offset(), i64::MAX);
    }

    #[test]
    fn test_paginate_rounds_pages_up() {
        let p = PageRequest::new(Some(1), Some(10));
        let page = p.paginate(vec![1, 2, 3], 21);
        assert_eq!(page.pagination.pages, 3);
        assert_eq!(p.paginate(Vec::<i32>::new(), 0).pagination.pages, 0);
    }

    #[test]
    fn test_filter_where_clause() {
        let mut filter = Filter::new();
        assert_eq!(filter.where_clause(), "");
        filter
            .scope("q.owner_id = ?", OwnerScope::Unrestricted)
            .text("q.status = ?", "won");
        assert_eq!(filter.where_clause(), "WHERE q.status = ?");
        filter.scope("q.owner_id = ?", OwnerScope::OwnedBy(4));
        assert_eq!(filter.where_clause(), "WHERE q.status = ? AND q.owner_id = ?");
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }
}
