//! Static definitions of the spreadsheets produced on every run.
//!
//! A [`DocumentSpec`] selects registrations and lays them out. Specs come
//! either from [`default_documents`] or from `[[documents]]` tables in the
//! TOML configuration file, and are validated once at startup.

use crate::domain::model::{OrderStatus, Registration, RegistrationSet};
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::validate_remote_path;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Built-in registration fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Id,
    OrderCode,
    Status,
    Email,
    Item,
    GivenName,
    FamilyName,
    Created,
    Price,
    /// Order total.
    Total,
    InvoiceName,
    InvoiceCompany,
    InvoiceStreet,
    InvoiceZipcode,
    InvoiceCity,
    InvoiceCountry,
    InvoiceVatId,
}

/// Where a column takes its value from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Source {
    Field(Field),
    Answer { answer: String },
    /// First source with a non-empty value.
    FirstOf { first_of: Vec<Source> },
}

impl Source {
    pub fn answer(question: &str) -> Self {
        Source::Answer {
            answer: question.to_string(),
        }
    }

    /// Replaces question texts by the answer keys they stand for. A text
    /// shared by several questions reads the first one answered.
    pub fn resolve(&self, set: &RegistrationSet) -> Source {
        match self {
            Source::Field(_) => self.clone(),
            Source::Answer { answer } => {
                let mut keys = set.question_keys(answer);
                if keys.len() == 1 {
                    Source::Answer {
                        answer: keys.remove(0),
                    }
                } else {
                    Source::FirstOf {
                        first_of: keys.into_iter().map(|answer| Source::Answer { answer }).collect(),
                    }
                }
            }
            Source::FirstOf { first_of } => Source::FirstOf {
                first_of: first_of.iter().map(|s| s.resolve(set)).collect(),
            },
        }
    }

    /// Answer keys read by this source.
    pub fn answer_keys(&self) -> Vec<&str> {
        match self {
            Source::Field(_) => vec![],
            Source::Answer { answer } => vec![answer.as_str()],
            Source::FirstOf { first_of } => first_of.iter().flat_map(|s| s.answer_keys()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    #[default]
    Text,
    Number,
    Date,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub header: String,
    pub source: Source,
    #[serde(default)]
    pub kind: CellKind,
}

impl ColumnSpec {
    pub fn new(header: &str, source: Source, kind: CellKind) -> Self {
        Self {
            header: header.to_string(),
            source,
            kind,
        }
    }

    pub fn text(header: &str, field: Field) -> Self {
        Self::new(header, Source::Field(field), CellKind::Text)
    }
}

/// Predicate choosing the registrations a document contains.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    #[default]
    All,
    StatusIn(Vec<OrderStatus>),
    StatusNotIn(Vec<OrderStatus>),
    /// Case-insensitive substring match on the item name.
    ItemContains(String),
    AnswerEquals { question: String, value: String },
    AllOf(Vec<Selector>),
    AnyOf(Vec<Selector>),
}

impl Selector {
    /// Everything except canceled registrations.
    pub fn active() -> Self {
        Selector::StatusNotIn(vec![OrderStatus::Canceled])
    }

    pub fn matches(&self, registration: &Registration) -> bool {
        match self {
            Selector::All => true,
            Selector::StatusIn(statuses) => statuses.contains(&registration.status),
            Selector::StatusNotIn(statuses) => !statuses.contains(&registration.status),
            Selector::ItemContains(needle) => registration
                .item
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            Selector::AnswerEquals { question, value } => registration
                .answer(question)
                .map(|answer| answer.contains(value))
                .unwrap_or(false),
            Selector::AllOf(selectors) => selectors.iter().all(|s| s.matches(registration)),
            Selector::AnyOf(selectors) => selectors.iter().any(|s| s.matches(registration)),
        }
    }

    /// Question texts become answer keys, see [`Source::resolve`].
    pub fn resolve(&self, set: &RegistrationSet) -> Selector {
        match self {
            Selector::AnswerEquals { question, value } => {
                let mut matching: Vec<Selector> = set
                    .question_keys(question)
                    .into_iter()
                    .map(|question| Selector::AnswerEquals {
                        question,
                        value: value.clone(),
                    })
                    .collect();
                if matching.len() == 1 {
                    matching.remove(0)
                } else {
                    Selector::AnyOf(matching)
                }
            }
            Selector::AllOf(selectors) => {
                Selector::AllOf(selectors.iter().map(|s| s.resolve(set)).collect())
            }
            Selector::AnyOf(selectors) => {
                Selector::AnyOf(selectors.iter().map(|s| s.resolve(set)).collect())
            }
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    pub header: String,
    pub select: Selector,
}

fn default_total_label() -> String {
    "Total".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Layout {
    /// One row per selected registration.
    Listing {
        columns: Vec<ColumnSpec>,
        #[serde(default)]
        sort_by: Vec<String>,
    },
    /// A listing per value of `group_by`, one file each. Every value in
    /// `groups` and every choice of the grouping question gets a file, even
    /// an empty one.
    Split {
        columns: Vec<ColumnSpec>,
        #[serde(default)]
        sort_by: Vec<String>,
        group_by: Source,
        #[serde(default)]
        groups: Vec<String>,
        #[serde(default)]
        keep_group_column: bool,
    },
    /// Counts per group, with a leading total row. Groups are resolved like
    /// those of `Split`.
    Tally {
        group_by: Source,
        #[serde(default)]
        groups: Vec<String>,
        group_header: String,
        counters: Vec<Counter>,
        #[serde(default = "default_total_label")]
        total_label: String,
    },
    /// Every built-in field plus one column per question of the event.
    Raw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSpec {
    pub name: String,
    #[serde(default)]
    pub subdir: Option<String>,
    #[serde(default)]
    pub select: Selector,
    #[serde(default)]
    pub autofilter: bool,
    pub layout: Layout,
}

impl DocumentSpec {
    /// Copy with every question reference resolved against the catalogue
    /// of `set`.
    pub fn resolve(&self, set: &RegistrationSet) -> DocumentSpec {
        let columns = |columns: &[ColumnSpec]| -> Vec<ColumnSpec> {
            columns
                .iter()
                .map(|c| ColumnSpec {
                    source: c.source.resolve(set),
                    ..c.clone()
                })
                .collect()
        };
        let layout = match &self.layout {
            Layout::Listing { columns: cs, sort_by } => Layout::Listing {
                columns: columns(cs),
                sort_by: sort_by.clone(),
            },
            Layout::Split {
                columns: cs,
                sort_by,
                group_by,
                groups,
                keep_group_column,
            } => Layout::Split {
                columns: columns(cs),
                sort_by: sort_by.clone(),
                group_by: group_by.resolve(set),
                groups: groups.clone(),
                keep_group_column: *keep_group_column,
            },
            Layout::Tally {
                group_by,
                groups,
                group_header,
                counters,
                total_label,
            } => Layout::Tally {
                group_by: group_by.resolve(set),
                groups: groups.clone(),
                group_header: group_header.clone(),
                counters: counters
                    .iter()
                    .map(|c| Counter {
                        header: c.header.clone(),
                        select: c.select.resolve(set),
                    })
                    .collect(),
                total_label: total_label.clone(),
            },
            Layout::Raw => Layout::Raw,
        };
        DocumentSpec {
            select: self.select.resolve(set),
            layout,
            ..self.clone()
        }
    }

    fn validate(&self) -> Result<()> {
        let field = format!("documents.{}", self.name);
        if self.name.trim().is_empty() {
            return Err(EtlError::config("documents", "document name cannot be empty"));
        }
        if let Some(subdir) = &self.subdir {
            validate_remote_path(&format!("{}.subdir", field), subdir)?;
        }

        match &self.layout {
            Layout::Listing { columns, sort_by } | Layout::Split { columns, sort_by, .. } => {
                if columns.is_empty() {
                    return Err(EtlError::config(field, "at least one column is required"));
                }
                let mut headers = HashSet::new();
                for column in columns {
                    if !headers.insert(column.header.as_str()) {
                        return Err(EtlError::config(
                            field,
                            format!("duplicate column header '{}'", column.header),
                        ));
                    }
                }
                if let Some(missing) = sort_by.iter().find(|h| !headers.contains(h.as_str())) {
                    return Err(EtlError::config(
                        field,
                        format!("sort column '{}' is not a column header", missing),
                    ));
                }
            }
            Layout::Tally { counters, .. } => {
                if counters.is_empty() {
                    return Err(EtlError::config(field, "at least one counter is required"));
                }
            }
            Layout::Raw => {}
        }
        Ok(())
    }
}

/// Checks every document definition and rejects duplicate target names.
pub fn validate_documents(specs: &[DocumentSpec]) -> Result<()> {
    if specs.is_empty() {
        return Err(EtlError::config("documents", "no documents configured"));
    }
    let mut keys = HashSet::new();
    for spec in specs {
        spec.validate()?;
        let key = (spec.subdir.clone(), spec.name.to_lowercase());
        if !keys.insert(key) {
            return Err(EtlError::config(
                "documents",
                format!("document '{}' is defined twice", spec.name),
            ));
        }
    }
    Ok(())
}

fn attendee_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::text("Item", Field::Item),
        ColumnSpec::text("Family name", Field::FamilyName),
        ColumnSpec::text("Given name", Field::GivenName),
        ColumnSpec::text("E-mail", Field::Email),
        ColumnSpec::new("Registered", Source::Field(Field::Created), CellKind::Date),
        ColumnSpec::new("Price", Source::Field(Field::Price), CellKind::Number),
        ColumnSpec::text("Status", Field::Status),
        ColumnSpec::text("Order code", Field::OrderCode),
    ]
}

fn attendee_sort() -> Vec<String> {
    vec![
        "Item".to_string(),
        "Family name".to_string(),
        "Given name".to_string(),
    ]
}

/// Documents produced when the configuration file defines none.
pub fn default_documents() -> Vec<DocumentSpec> {
    vec![
        DocumentSpec {
            name: "Raw_Data".to_string(),
            subdir: None,
            select: Selector::All,
            autofilter: true,
            layout: Layout::Raw,
        },
        DocumentSpec {
            name: "All".to_string(),
            subdir: None,
            select: Selector::active(),
            autofilter: true,
            layout: Layout::Listing {
                columns: attendee_columns(),
                sort_by: attendee_sort(),
            },
        },
        DocumentSpec {
            name: "Paid".to_string(),
            subdir: None,
            select: Selector::StatusIn(vec![OrderStatus::Paid]),
            autofilter: true,
            layout: Layout::Listing {
                columns: attendee_columns(),
                sort_by: attendee_sort(),
            },
        },
        DocumentSpec {
            name: "Numbers".to_string(),
            subdir: None,
            select: Selector::active(),
            autofilter: false,
            layout: Layout::Tally {
                group_by: Source::Field(Field::Item),
                groups: vec![],
                group_header: "Item".to_string(),
                counters: vec![
                    Counter {
                        header: "Paid".to_string(),
                        select: Selector::StatusIn(vec![OrderStatus::Paid]),
                    },
                    Counter {
                        header: "Pending".to_string(),
                        select: Selector::StatusIn(vec![OrderStatus::Pending]),
                    },
                ],
                total_label: default_total_label(),
            },
        },
    ]
}
