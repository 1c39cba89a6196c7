use serde::Deserialize;

pub const DEFAULT_MESSAGE_LIMIT: i64 = 20;
pub const DEFAULT_CONVERSATION_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 100;

/// Raw query parameters. Kept as strings so malformed values fall back to
/// defaults instead of failing extraction.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub order: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

impl Pagination {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self { limit, offset }
    }

    /// Parse `limit`/`offset`; unparseable, zero or negative limits use the
    /// default, limits above [`MAX_LIMIT`] are capped, bad offsets become 0.
    pub fn from_query(limit: Option<&str>, offset: Option<&str>, default_limit: i64) -> Self {
        let limit = limit
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|v| *v > 0)
            .map(|v| v.min(MAX_LIMIT))
            .unwrap_or(default_limit);
        let offset = offset
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|v| *v >= 0)
            .unwrap_or(0);
        Self { limit, offset }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

impl SortOrder {
    pub fn from_query(order: Option<&str>) -> Self {
        match order.map(|o| o.trim().to_ascii_lowercase()).as_deref() {
            Some("asc") | Some("oldest") => Self::OldestFirst,
            _ => Self::NewestFirst,
        }
    }
}

impl PageQuery {
    pub fn pagination(&self, default_limit: i64) -> Pagination {
        Pagination::from_query(self.limit.as_deref(), self.offset.as_deref(), default_limit)
    }

    pub fn order(&self) -> SortOrder {
        SortOrder::from_query(self.order.as_deref())
    }
}
