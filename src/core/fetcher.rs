//! Paginated retrieval of order positions from the pretix REST API.
//!
//! The fetcher walks the `next` links of the orders listing, collecting pages
//! into a [`SnapshotAccumulator`] that dedupes records and checks the final
//! count against the one reported upstream. It never retries on its own: a
//! failed fetch fails the whole run, and the scheduler tries again later.

use crate::domain::model::{
    Answer, InvoiceAddress, OrderStatus, Question, Registration, RegistrationSet,
};
use crate::utils::error::{EtlError, Result, Stage};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

/// Query filters applied to the orders listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchFilters {
    pub status: Option<OrderStatus>,
    pub testmode: Option<bool>,
}

impl FetchFilters {
    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(status) = &self.status {
            query.push(("status", status.code().to_string()));
        }
        if let Some(testmode) = self.testmode {
            query.push(("testmode", testmode.to_string()));
        }
        query
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Page<T> {
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub next: Option<String>,
    pub results: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct WireOrder {
    pub code: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub email: Option<String>,
    pub datetime: DateTime<Utc>,
    #[serde(default)]
    pub total: Option<String>,
    #[serde(default)]
    pub invoice_address: Option<WireInvoiceAddress>,
    #[serde(default)]
    pub positions: Vec<WirePosition>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub(crate) struct WireInvoiceAddress {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub zipcode: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub vat_id: Option<String>,
}

impl WireInvoiceAddress {
    fn to_address(&self) -> InvoiceAddress {
        let field = |value: &Option<String>| value.as_deref().unwrap_or("").trim().to_string();
        InvoiceAddress {
            name: field(&self.name),
            company: field(&self.company),
            street: field(&self.street),
            zipcode: field(&self.zipcode),
            city: field(&self.city),
            country: field(&self.country),
            vat_id: field(&self.vat_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct WirePosition {
    pub id: u64,
    pub item: u64,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub attendee_name_parts: Option<NameParts>,
    #[serde(default)]
    pub answers: Vec<WireAnswer>,
    #[serde(default)]
    pub canceled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub(crate) struct NameParts {
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct WireAnswer {
    pub question: u64,
    #[serde(default)]
    pub question_identifier: Option<String>,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub options: Vec<u64>,
}

fn question_key(identifier: Option<&str>, id: u64) -> String {
    match identifier.map(str::trim) {
        Some(identifier) if !identifier.is_empty() => identifier.to_string(),
        _ => format!("question_{}", id),
    }
}

/// Decimal amount as sent by pretix; anything not finite is dropped.
fn parse_amount(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|p| p.trim().parse::<f64>().ok())
        .filter(|p| p.is_finite())
}

impl WireAnswer {
    fn key(&self) -> String {
        question_key(self.question_identifier.as_deref(), self.question)
    }

    fn value(&self) -> Answer {
        if self.options.len() > 1 {
            Answer::Multiple(
                self.answer
                    .split(", ")
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect(),
            )
        } else {
            Answer::Single(self.answer.clone())
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireItem {
    pub id: u64,
    pub name: BTreeMap<String, String>,
}

/// Item id to display name.
pub type ItemCatalog = HashMap<u64, String>;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireQuestion {
    pub id: u64,
    #[serde(default)]
    pub identifier: Option<String>,
    pub question: BTreeMap<String, String>,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub options: Vec<WireQuestionOption>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireQuestionOption {
    #[serde(default)]
    pub position: i64,
    pub answer: BTreeMap<String, String>,
}

impl WireQuestion {
    fn to_question(&self, locale: &str) -> Question {
        let mut options: Vec<&WireQuestionOption> = self.options.iter().collect();
        options.sort_by_key(|o| o.position);
        let mut seen = HashSet::new();
        Question {
            id: self.id,
            key: question_key(self.identifier.as_deref(), self.id),
            text: localized(&self.question, locale)
                .unwrap_or_else(|| format!("question_{}", self.id)),
            options: options
                .into_iter()
                .filter_map(|o| localized(&o.answer, locale))
                .map(|text| text.trim().to_string())
                .filter(|text| seen.insert(text.clone()))
                .collect(),
            position: self.position,
        }
    }
}

/// Picks the preferred translation, falling back to the first one available.
pub(crate) fn localized(names: &BTreeMap<String, String>, locale: &str) -> Option<String> {
    names
        .get(locale)
        .filter(|name| !name.trim().is_empty())
        .or_else(|| names.values().find(|name| !name.trim().is_empty()))
        .cloned()
}

/// Collects order pages in any order and turns them into one snapshot.
#[derive(Debug, Default)]
pub(crate) struct SnapshotAccumulator {
    orders: BTreeMap<String, WireOrder>,
    reported_count: Option<usize>,
    pages: usize,
}

impl SnapshotAccumulator {
    pub fn ingest(&mut self, page: Page<WireOrder>) -> Result<()> {
        self.pages += 1;
        if let Some(count) = page.count {
            match self.reported_count {
                Some(previous) if previous != count => {
                    return Err(EtlError::ConsistencyError {
                        expected: previous,
                        actual: count,
                        message: "pages report different totals; the listing changed during the fetch"
                            .to_string(),
                    });
                }
                _ => self.reported_count = Some(count),
            }
        }
        for order in page.results {
            // 重複的邊界記錄只保留第一筆
            self.orders.entry(order.code.clone()).or_insert(order);
        }
        Ok(())
    }

    pub fn finish(self, items: &ItemCatalog) -> Result<RegistrationSet> {
        if let Some(expected) = self.reported_count {
            if expected != self.orders.len() {
                return Err(EtlError::ConsistencyError {
                    expected,
                    actual: self.orders.len(),
                    message: format!("distinct orders after {} pages", self.pages),
                });
            }
        }

        let mut registrations = Vec::new();
        for order in self.orders.into_values() {
            for position in &order.positions {
                registrations.push(to_registration(&order, position, items));
            }
        }
        Ok(RegistrationSet::new(registrations))
    }
}

fn to_registration(order: &WireOrder, position: &WirePosition, items: &ItemCatalog) -> Registration {
    let names = position.attendee_name_parts.clone().unwrap_or_default();
    let status = if position.canceled {
        OrderStatus::Canceled
    } else {
        order.status.clone()
    };
    let answers = position
        .answers
        .iter()
        .map(|answer| (answer.key(), answer.value()))
        .collect();

    Registration {
        id: position.id,
        order_code: order.code.clone(),
        status,
        email: order.email.clone().filter(|e| !e.trim().is_empty()),
        created: order.datetime,
        item: items
            .get(&position.item)
            .cloned()
            .unwrap_or_else(|| format!("Item {}", position.item)),
        given_name: names.given_name.unwrap_or_default(),
        family_name: names.family_name.unwrap_or_default(),
        price: parse_amount(position.price.as_deref()),
        order_total: parse_amount(order.total.as_deref()),
        invoice: order
            .invoice_address
            .as_ref()
            .map(WireInvoiceAddress::to_address)
            .unwrap_or_default(),
        answers,
    }
}

/// Client for one organizer/event pair.
#[derive(Debug, Clone)]
pub struct PretixClient {
    client: Client,
    event_url: String,
    token: String,
    locale: String,
}

impl PretixClient {
    pub fn new(
        api_url: &str,
        organizer: &str,
        event: &str,
        token: &str,
        locale: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EtlError::config("http_client", e.to_string()))?;

        Ok(Self {
            client,
            event_url: format!(
                "{}/api/v1/organizers/{}/events/{}",
                api_url.trim_end_matches('/'),
                organizer,
                event
            ),
            token: token.to_string(),
            locale: locale.to_string(),
        })
    }

    pub fn event_url(&self) -> &str {
        &self.event_url
    }

    /// Fetches the complete registration snapshot for the event.
    pub async fn fetch_all(&self, filters: &FetchFilters) -> Result<RegistrationSet> {
        let items = self.fetch_items().await?;
        let questions = self.fetch_questions().await?;

        let mut accumulator = SnapshotAccumulator::default();
        let pages: Vec<Page<WireOrder>> = self
            .get_all(format!("{}/orders/", self.event_url), filters.query())
            .await?;
        for page in pages {
            accumulator.ingest(page)?;
        }

        let registrations = accumulator.finish(&items)?.with_questions(questions);
        tracing::debug!("Snapshot complete: {} registrations", registrations.len());
        Ok(registrations)
    }

    /// Fetches the item catalogue used to name ticket types.
    pub async fn fetch_items(&self) -> Result<ItemCatalog> {
        let pages: Vec<Page<WireItem>> = self
            .get_all(format!("{}/items/", self.event_url), Vec::new())
            .await?;
        let items: ItemCatalog = pages
            .into_iter()
            .flat_map(|page| page.results)
            .map(|item| {
                let name = localized(&item.name, &self.locale)
                    .unwrap_or_else(|| format!("Item {}", item.id));
                (item.id, name)
            })
            .collect();
        tracing::debug!("Fetched {} items", items.len());
        Ok(items)
    }

    /// Fetches every question of the event with its choices.
    pub async fn fetch_questions(&self) -> Result<Vec<Question>> {
        let pages: Vec<Page<WireQuestion>> = self
            .get_all(format!("{}/questions/", self.event_url), Vec::new())
            .await?;
        let questions: Vec<Question> = pages
            .iter()
            .flat_map(|page| page.results.iter())
            .map(|question| question.to_question(&self.locale))
            .collect();
        tracing::debug!("Fetched {} questions", questions.len());
        Ok(questions)
    }

    /// Follows `next` links until the last page. A link seen before fails
    /// the fetch instead of looping.
    async fn get_all<T: DeserializeOwned>(
        &self,
        first: String,
        mut query: Vec<(&'static str, String)>,
    ) -> Result<Vec<Page<T>>> {
        let mut pages = Vec::new();
        let mut visited = HashSet::new();
        let mut url = first;
        loop {
            if !visited.insert(url.clone()) {
                return Err(EtlError::UpstreamError {
                    url,
                    status: 200,
                    message: "pagination links form a cycle".to_string(),
                });
            }
            let page: Page<T> = self.get_page(&url, &query).await?;
            tracing::debug!(
                "Fetched page {} ({} results, reported total {:?})",
                url,
                page.results.len(),
                page.count
            );
            let next = page.next.clone().filter(|n| !n.is_empty());
            pages.push(page);

            match next {
                Some(next_url) => {
                    url = next_url;
                    // `next` links already carry the filter parameters.
                    query.clear();
                }
                None => return Ok(pages),
            }
        }
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&'static str, String)],
    ) -> Result<Page<T>> {
        let response = self
            .client
            .get(url)
            .query(query)
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| EtlError::from_transport(Stage::Fetch, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(url, status, &body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| EtlError::from_transport(Stage::Fetch, e))?;
        serde_json::from_str(&body).map_err(|e| EtlError::UpstreamError {
            url: url.to_string(),
            status: status.as_u16(),
            message: format!("unexpected response body: {}", e),
        })
    }
}

/// 429 and 5xx are retryable; any other non-success status is not.
pub(crate) fn classify_status(url: &str, status: StatusCode, body: &str) -> EtlError {
    let snippet: String = body.chars().take(200).collect();
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        EtlError::transient(
            Stage::Fetch,
            Some(status.as_u16()),
            format!("{} returned {}: {}", url, status, snippet),
        )
    } else {
        EtlError::UpstreamError {
            url: url.to_string(),
            status: status.as_u16(),
            message: snippet,
        }
    }
}
