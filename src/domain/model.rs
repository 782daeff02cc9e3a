use crate::utils::error::{EtlError, Stage};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Order status as reported by the ticketing platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OrderStatus {
    Pending,
    Paid,
    Expired,
    Canceled,
    Other(String),
}

impl OrderStatus {
    pub fn code(&self) -> &str {
        match self {
            OrderStatus::Pending => "n",
            OrderStatus::Paid => "p",
            OrderStatus::Expired => "e",
            OrderStatus::Canceled => "c",
            OrderStatus::Other(code) => code,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Expired => "expired",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Other(code) => code,
        }
    }
}

impl From<String> for OrderStatus {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "n" | "pending" => OrderStatus::Pending,
            "p" | "paid" => OrderStatus::Paid,
            "e" | "expired" => OrderStatus::Expired,
            "c" | "canceled" | "cancelled" => OrderStatus::Canceled,
            _ => OrderStatus::Other(value),
        }
    }
}

impl From<OrderStatus> for String {
    fn from(value: OrderStatus) -> Self {
        value.code().to_string()
    }
}

/// Answer to an event-specific question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Single(String),
    Multiple(Vec<String>),
}

impl Answer {
    /// Text rendering; multiple values are joined with ", ".
    pub fn as_text(&self) -> String {
        match self {
            Answer::Single(value) => value.clone(),
            Answer::Multiple(values) => values.join(", "),
        }
    }

    pub fn contains(&self, needle: &str) -> bool {
        match self {
            Answer::Single(value) => value == needle,
            Answer::Multiple(values) => values.iter().any(|v| v == needle),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Answer::Single(value) => value.trim().is_empty(),
            Answer::Multiple(values) => values.iter().all(|v| v.trim().is_empty()),
        }
    }
}

/// Billing address of the order a position belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceAddress {
    pub name: String,
    pub company: String,
    pub street: String,
    pub zipcode: String,
    pub city: String,
    pub country: String,
    pub vat_id: String,
}

/// One order position of the configured event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub id: u64,
    pub order_code: String,
    pub status: OrderStatus,
    pub email: Option<String>,
    pub created: DateTime<Utc>,
    pub item: String,
    pub given_name: String,
    pub family_name: String,
    pub price: Option<f64>,
    /// Total of the whole order, shared by all of its positions.
    pub order_total: Option<f64>,
    pub invoice: InvoiceAddress,
    /// Keyed by [`Question::key`].
    pub answers: BTreeMap<String, Answer>,
}

impl Registration {
    pub fn answer(&self, question: &str) -> Option<&Answer> {
        self.answers.get(question)
    }
}

/// Question asked during checkout, with its text in the configured locale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: u64,
    /// Identifier answers are stored under: the question identifier, or
    /// `question_<id>` when it has none.
    pub key: String,
    pub text: String,
    /// Choices of a choice question, in their configured order.
    pub options: Vec<String>,
    pub position: i64,
}

impl Question {
    /// Matches by answer key or, case-insensitively, by visible text.
    pub fn is_named(&self, name: &str) -> bool {
        let name = name.trim();
        self.key == name || self.text.trim().to_lowercase() == name.to_lowercase()
    }
}

/// Complete snapshot of an event's registrations, ordered by id, together
/// with the event's question catalogue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationSet {
    registrations: Vec<Registration>,
    questions: Vec<Question>,
}

impl RegistrationSet {
    /// Sorts by id and keeps the first record seen for every id.
    pub fn new(mut registrations: Vec<Registration>) -> Self {
        registrations.sort_by_key(|r| r.id);
        registrations.dedup_by_key(|r| r.id);
        Self {
            registrations,
            questions: Vec::new(),
        }
    }

    /// Attaches the question catalogue, ordered by position then id.
    pub fn with_questions(mut self, mut questions: Vec<Question>) -> Self {
        questions.sort_by_key(|q| (q.position, q.id));
        questions.dedup_by_key(|q| q.id);
        self.questions = questions;
        self
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    /// Answer keys a question name refers to. Several questions may share
    /// one text; an unknown name is used as a key as is.
    pub fn question_keys(&self, name: &str) -> Vec<String> {
        let keys: Vec<String> = self
            .questions
            .iter()
            .filter(|q| q.is_named(name))
            .map(|q| q.key.clone())
            .collect();
        if keys.is_empty() {
            vec![name.to_string()]
        } else {
            keys
        }
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.registrations.iter()
    }

    pub fn ids(&self) -> Vec<u64> {
        self.registrations.iter().map(|r| r.id).collect()
    }
}

/// Typed spreadsheet cell value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    /// Local wall-clock time in the configured zone.
    DateTime(NaiveDateTime),
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(value) => value.is_empty(),
            _ => false,
        }
    }

    /// Display text, also used for column width estimation and grouping.
    pub fn display(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(value) => value.clone(),
            Cell::Number(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
                format!("{}", *value as i64)
            }
            Cell::Number(value) => format!("{}", value),
            Cell::DateTime(value) => value.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

/// One normalized spreadsheet row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputRow {
    /// Source registration; `None` for aggregate rows.
    pub registration_id: Option<u64>,
    pub cells: Vec<Cell>,
}

/// Rows for one target file, produced by the transformer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentRows {
    pub name: String,
    pub subdir: Option<String>,
    pub headers: Vec<String>,
    pub rows: Vec<OutputRow>,
    pub autofilter: bool,
}

impl DocumentRows {
    /// Path relative to the upload directory, without extension.
    pub fn key(&self) -> String {
        match &self.subdir {
            Some(subdir) => format!("{}/{}", subdir, self.name),
            None => self.name.clone(),
        }
    }
}

/// Serialized spreadsheet ready for upload.
#[derive(Debug, Clone)]
pub struct Document {
    pub file_name: String,
    pub subdir: Option<String>,
    pub bytes: Vec<u8>,
    pub row_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    /// Registrations were identical to the last published snapshot.
    Unchanged,
    Failed,
}

/// Outcome of one pipeline run. Logged, then dropped.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: u64,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub status: RunStatus,
    pub registrations_fetched: usize,
    pub rows_per_document: HashMap<String, usize>,
    pub bytes_uploaded: usize,
    pub errors: Vec<String>,
    pub failed_stage: Option<Stage>,
    /// Process exit code if this was the only run.
    pub exit_code: i32,
}

impl RunResult {
    pub fn new(run_id: u64) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            duration: Duration::ZERO,
            status: RunStatus::Failed,
            registrations_fetched: 0,
            rows_per_document: HashMap::new(),
            bytes_uploaded: 0,
            errors: Vec::new(),
            failed_stage: None,
            exit_code: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status != RunStatus::Failed
    }

    pub fn fail(&mut self, stage: Stage, error: &EtlError) {
        self.status = RunStatus::Failed;
        self.failed_stage = Some(stage);
        self.exit_code = error.exit_code();
        self.errors.push(error.to_string());
    }
}

/// What the publisher delivered in one run.
#[derive(Debug, Clone, Default)]
pub struct PublishReport {
    pub files: Vec<String>,
    pub bytes_uploaded: usize,
}
