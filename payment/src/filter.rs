use crate::payment::Payment;
use crate::status::PaymentStatus;
use serde::Serialize;
use std::cmp::Ordering;
use tokio_postgres::types::ToSql;

pub type SqlParam = Box<dyn ToSql + Sync + Send>;

/// Search criteria. Every populated field narrows the result (AND); the
/// statuses list matches any of its members. Empty means unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentFilter {
    pub order_id: Option<String>,
    pub user_id: Option<String>,
    pub statuses: Vec<PaymentStatus>,
}

/// A parameterised `WHERE` clause. `clause` is empty when nothing filters.
pub struct SqlFilter {
    pub clause: String,
    pub params: Vec<SqlParam>,
}

impl SqlFilter {
    pub fn param_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect()
    }
}

impl PaymentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn statuses(mut self, statuses: impl IntoIterator<Item = PaymentStatus>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self.statuses.sort();
        self.statuses.dedup();
        self
    }

    pub fn matches(&self, payment: &Payment) -> bool {
        if let Some(order_id) = &self.order_id {
            if &payment.order_id != order_id {
                return false;
            }
        }
        if let Some(user_id) = &self.user_id {
            if &payment.user_id != user_id {
                return false;
            }
        }
        self.statuses.is_empty() || self.statuses.contains(&payment.status)
    }

    pub fn to_sql(&self) -> SqlFilter {
        let mut predicates = Vec::new();
        let mut params: Vec<SqlParam> = Vec::new();

        if let Some(order_id) = &self.order_id {
            params.push(Box::new(order_id.clone()));
            predicates.push(format!("order_id = ${}", params.len()));
        }
        if let Some(user_id) = &self.user_id {
            params.push(Box::new(user_id.clone()));
            predicates.push(format!("user_id = ${}", params.len()));
        }
        if !self.statuses.is_empty() {
            params.push(Box::new(self.statuses.clone()));
            predicates.push(format!("status = ANY(${})", params.len()));
        }

        let clause = if predicates.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", predicates.join(" AND "))
        };

        SqlFilter { clause, params }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SortError {
    #[error("unknown sort property: {0}")]
    UnknownField(String),
    #[error("unknown sort direction: {0}")]
    UnknownDirection(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Id,
    OrderId,
    UserId,
    Status,
    Timestamp,
    PaymentAmount,
}

impl SortField {
    fn column(self) -> &'static str {
        match self {
            SortField::Id => "id",
            SortField::OrderId => "order_id",
            SortField::UserId => "user_id",
            SortField::Status => "status",
            SortField::Timestamp => "created_at",
            SortField::PaymentAmount => "amount",
        }
    }

    fn compare(self, a: &Payment, b: &Payment) -> Ordering {
        match self {
            SortField::Id => a.id.cmp(&b.id),
            SortField::OrderId => a.order_id.cmp(&b.order_id),
            SortField::UserId => a.user_id.cmp(&b.user_id),
            SortField::Status => a.status.cmp(&b.status),
            SortField::Timestamp => a.timestamp.cmp(&b.timestamp),
            SortField::PaymentAmount => a.amount.cmp(&b.amount),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOrder {
    pub field: SortField,
    pub direction: Direction,
}

impl SortOrder {
    /// Parses `field` or `field,asc|desc` using the JSON property names.
    pub fn parse(param: &str) -> Result<Self, SortError> {
        let mut parts = param.split(',').map(str::trim);
        let name = parts.next().unwrap_or("");
        let field = match name {
            "id" => SortField::Id,
            "orderId" => SortField::OrderId,
            "userId" => SortField::UserId,
            "status" => SortField::Status,
            "timestamp" => SortField::Timestamp,
            "paymentAmount" => SortField::PaymentAmount,
            _ => return Err(SortError::UnknownField(name.to_string())),
        };
        let direction = match parts.next() {
            None => Direction::Asc,
            Some(d) if d.eq_ignore_ascii_case("asc") => Direction::Asc,
            Some(d) if d.eq_ignore_ascii_case("desc") => Direction::Desc,
            Some(d) => return Err(SortError::UnknownDirection(d.to_string())),
        };
        if let Some(extra) = parts.next() {
            return Err(SortError::UnknownDirection(extra.to_string()));
        }
        Ok(Self { field, direction })
    }

    pub fn compare(&self, a: &Payment, b: &Payment) -> Ordering {
        let ord = self.field.compare(a, b);
        match self.direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pageable {
    pub page: u32,
    pub size: u32,
    pub sort: Vec<SortOrder>,
}

impl Pageable {
    pub const DEFAULT_SIZE: u32 = 20;
    pub const MAX_SIZE: u32 = 2000;

    pub fn new(page: u32, size: u32) -> Self {
        Self {
            page,
            size,
            sort: Vec::new(),
        }
    }

    pub fn sorted_by(mut self, order: SortOrder) -> Self {
        self.sort.push(order);
        self
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page) * i64::from(self.size)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.size)
    }

    /// `ORDER BY` built only from whitelisted columns; falls back to
    /// creation order so pages are stable.
    pub fn order_by(&self) -> String {
        let mut terms: Vec<String> = self
            .sort
            .iter()
            .map(|o| {
                let dir = match o.direction {
                    Direction::Asc => "ASC",
                    Direction::Desc => "DESC",
                };
                format!("{} {}", o.field.column(), dir)
            })
            .collect();

        if !self.sort.iter().any(|o| o.field == SortField::Timestamp) {
            terms.push("created_at ASC".to_string());
        }
        if !self.sort.iter().any(|o| o.field == SortField::Id) {
            terms.push("id ASC".to_string());
        }

        format!("ORDER BY {}", terms.join(", "))
    }

    pub fn compare(&self, a: &Payment, b: &Payment) -> Ordering {
        self.sort
            .iter()
            .map(|o| o.compare(a, b))
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl Default for Pageable {
    fn default() -> Self {
        Self::new(0, Self::DEFAULT_SIZE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub total_elements: u64,
    pub total_pages: u64,
    pub number: u32,
    pub size: u32,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, total_elements: u64, pageable: &Pageable) -> Self {
        let size = u64::from(pageable.size.max(1));
        Self {
            content,
            total_elements,
            total_pages: total_elements.div_ceil(size),
            number: pageable.page,
            size: pageable.size,
        }
    }
}
