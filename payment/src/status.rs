use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::str::FromStr;
use tokio_postgres::types::{FromSql, IsNull, ToSql, Type};

/// Outcome of a payment. Declaration order matches the `payment_status`
/// enum in Postgres so sorting agrees between stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Paid,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown payment status: {0}")]
pub struct UnknownStatus(pub String);

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
        }
    }

    /// Even draws pay, odd draws fail.
    pub fn from_draw(n: i64) -> Self {
        if n % 2 == 0 {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Failed
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        if token.eq_ignore_ascii_case("PAID") {
            Ok(PaymentStatus::Paid)
        } else if token.eq_ignore_ascii_case("FAILED") {
            Ok(PaymentStatus::Failed)
        } else {
            Err(UnknownStatus(s.to_string()))
        }
    }
}

impl ToSql for PaymentStatus {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>>
    where
        Self: Sized,
    {
        self.as_str().to_sql(ty, out)
    }

    fn accepts(ty: &Type) -> bool
    where
        Self: Sized,
    {
        ty.name() == "payment_status"
    }

    fn to_sql_checked(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        if !<Self as ToSql>::accepts(ty) {
            return Err(Box::new(tokio_postgres::types::WrongType::new::<Self>(
                ty.clone(),
            )));
        }
        self.to_sql(ty, out)
    }
}

impl<'a> FromSql<'a> for PaymentStatus {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        let s = std::str::from_utf8(raw)?;
        match s {
            "PAID" => Ok(PaymentStatus::Paid),
            "FAILED" => Ok(PaymentStatus::Failed),
            _ => Err(format!("unknown payment_status variant: {}", s).into()),
        }
    }

    fn accepts(ty: &Type) -> bool {
        ty.name() == "payment_status"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("PAID".parse(), Ok(PaymentStatus::Paid));
        assert_eq!("paid".parse(), Ok(PaymentStatus::Paid));
        assert_eq!(" Failed ".parse(), Ok(PaymentStatus::Failed));
    }

    #[test]
    fn rejects_unknown_tokens() {
        let err = "REFUNDED".parse::<PaymentStatus>().unwrap_err();
        assert_eq!(err, UnknownStatus("REFUNDED".to_string()));
        assert!("".parse::<PaymentStatus>().is_err());
    }

    #[test]
    fn draw_parity_decides_status() {
        assert_eq!(PaymentStatus::from_draw(0), PaymentStatus::Paid);
        assert_eq!(PaymentStatus::from_draw(42), PaymentStatus::Paid);
        assert_eq!(PaymentStatus::from_draw(7), PaymentStatus::Failed);
        assert_eq!(PaymentStatus::from_draw(-3), PaymentStatus::Failed);
        assert_eq!(PaymentStatus::from_draw(-4), PaymentStatus::Paid);
    }

    #[test]
    fn serializes_uppercase() {
        assert_eq!(serde_json::to_string(&PaymentStatus::Paid).unwrap(), "\"PAID\"");
        assert_eq!(
            serde_json::from_str::<PaymentStatus>("\"FAILED\"").unwrap(),
            PaymentStatus::Failed
        );
    }
}
