use crate::api::{ApiBody, ApiError, ApiResponse, full};
use crate::gateway::Gateway;
use hyper::header::AUTHORIZATION;
use hyper::{Method, Request, Response, StatusCode};
use payment::{Pageable, PaymentFilter, PaymentStatus, SortOrder};
use std::convert::Infallible;
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const SEARCH_PATH: &str = "/api/v1/payments/search";
const SUMMARY_PATH: &str = "/api/v1/payments/summary";

enum Endpoint {
    Health,
    Search(QueryParams),
    Summary(QueryParams),
}

pub async fn route<B>(
    req: Request<B>,
    gateway: Arc<Gateway>,
) -> Result<Response<ApiBody>, Infallible> {
    let endpoint = resolve(&req, &gateway);

    let res = match endpoint {
        Ok(Endpoint::Health) => Ok(Response::new(full("OK"))),
        Ok(Endpoint::Search(params)) => search(params, &gateway).await,
        Ok(Endpoint::Summary(params)) => summary(params, &gateway).await,
        Err(e) => Err(e),
    };

    Ok(res.unwrap_or_else(ApiError::into_response))
}

fn resolve<B>(req: &Request<B>, gateway: &Gateway) -> Result<Endpoint, ApiError> {
    let endpoint = match (req.method(), req.uri().path()) {
        (&Method::GET, "/health") => return Ok(Endpoint::Health),
        (&Method::GET, SEARCH_PATH) => Endpoint::Search(QueryParams::parse(req)),
        (&Method::GET, SUMMARY_PATH) => Endpoint::Summary(QueryParams::parse(req)),
        (_, "/health" | SEARCH_PATH | SUMMARY_PATH) => return Err(ApiError::MethodNotAllowed),
        _ => return Err(ApiError::NotFound),
    };

    authorize(req, gateway)?;
    Ok(endpoint)
}

async fn search(params: QueryParams, gateway: &Gateway) -> Result<Response<ApiBody>, ApiError> {
    let filter = search_filter(&params)?;
    let pageable = pageable(&params)?;

    let page = gateway.store.search(&filter, &pageable).await?;
    tracing::debug!(total = page.total_elements, "payments searched");

    Ok(ApiResponse::success("Payments found", page).into_response(StatusCode::OK))
}

async fn summary(params: QueryParams, gateway: &Gateway) -> Result<Response<ApiBody>, ApiError> {
    let from = params.required_instant("from")?;
    let to = params.required_instant("to")?;

    let total = gateway
        .store
        .sum_amount(PaymentStatus::Paid, from, to)
        .await?;

    Ok(
        ApiResponse::success("Total amount of paid payments in period", total)
            .into_response(StatusCode::OK),
    )
}

/// Open when no admin token is configured.
fn authorize<B>(req: &Request<B>, gateway: &Gateway) -> Result<(), ApiError> {
    let Some(expected) = gateway.admin_token.as_deref() else {
        return Ok(());
    };

    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::Unauthorized)?;

    if tokens_match(token.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

/// Compares every byte regardless of where the first mismatch is. Only the
/// length leaks through timing.
fn tokens_match(given: &[u8], expected: &[u8]) -> bool {
    given.len() == expected.len()
        && given
            .iter()
            .zip(expected)
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
}

fn search_filter(params: &QueryParams) -> Result<PaymentFilter, ApiError> {
    let mut filter = PaymentFilter::new();

    if let Some(order_id) = params.first("orderId") {
        filter = filter.order_id(order_id);
    }
    if let Some(user_id) = params.first("userId") {
        filter = filter.user_id(user_id);
    }

    // Both `statuses=PAID&statuses=FAILED` and `statuses=PAID,FAILED`.
    let statuses = params
        .all("statuses")
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<PaymentStatus>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    if !statuses.is_empty() {
        filter = filter.statuses(statuses);
    }

    Ok(filter)
}

fn pageable(params: &QueryParams) -> Result<Pageable, ApiError> {
    let page = params.number("page", 0)?;
    let size = params.number("size", Pageable::DEFAULT_SIZE)?;
    if !(1..=Pageable::MAX_SIZE).contains(&size) {
        return Err(ApiError::BadRequest(format!(
            "Page size must be between 1 and {}",
            Pageable::MAX_SIZE
        )));
    }

    params
        .all("sort")
        .filter(|s| !s.trim().is_empty())
        .try_fold(Pageable::new(page, size), |pageable, s| {
            SortOrder::parse(s)
                .map(|order| pageable.sorted_by(order))
                .map_err(|e| ApiError::BadRequest(e.to_string()))
        })
}

struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    fn parse<B>(req: &Request<B>) -> Self {
        let query = req.uri().query().unwrap_or("");
        Self(
            form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        )
    }

    fn all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First non-blank value.
    fn first<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        self.all(name).map(str::trim).find(|v| !v.is_empty())
    }

    fn number(&self, name: &str, default: u32) -> Result<u32, ApiError> {
        match self.first(name) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| {
                ApiError::BadRequest(format!("Invalid value for parameter {name}: {v}"))
            }),
        }
    }

    fn required_instant(&self, name: &str) -> Result<OffsetDateTime, ApiError> {
        let value = self
            .first(name)
            .ok_or_else(|| ApiError::BadRequest(format!("Parameter is missing: {name}")))?;

        OffsetDateTime::parse(value, &Rfc3339).map_err(|_| {
            ApiError::BadRequest(format!("Invalid value for parameter {name}: {value}"))
        })
    }
}
