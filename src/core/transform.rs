//! Pure mapping from a registration snapshot to spreadsheet rows.
//!
//! Output never depends on the order registrations arrived in: rows are sorted
//! by the document's sort columns with the registration id as tiebreaker, and
//! documents are keyed in a `BTreeMap`.

use crate::domain::documents::{
    CellKind, ColumnSpec, Counter, DocumentSpec, Field, Layout, Selector, Source,
};
use crate::domain::model::{Cell, DocumentRows, OutputRow, Registration, RegistrationSet};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Untyped value read from a registration before it is shaped into a cell.
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Text(String),
    Number(f64),
    Timestamp(DateTime<Utc>),
}

#[derive(Debug, Clone)]
pub struct Transformer {
    timezone: Tz,
}

impl Transformer {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    /// Produces the rows of every document, keyed by target path.
    pub fn transform(
        &self,
        registrations: &RegistrationSet,
        specs: &[DocumentSpec],
    ) -> BTreeMap<String, DocumentRows> {
        let mut documents = BTreeMap::new();
        for spec in specs {
            let spec = spec.resolve(registrations);
            let selected: Vec<&Registration> = registrations
                .iter()
                .filter(|r| spec.select.matches(r))
                .collect();

            let produced = match &spec.layout {
                Layout::Listing { columns, sort_by } => {
                    vec![self.listing(&spec, &spec.name, spec.subdir.clone(), columns, sort_by, &selected)]
                }
                Layout::Split {
                    columns,
                    sort_by,
                    group_by,
                    groups,
                    keep_group_column,
                } => {
                    let groups = self.groups(registrations, group_by, groups, &selected);
                    self.split(&spec, columns, sort_by, group_by, groups, *keep_group_column, &selected)
                }
                Layout::Tally {
                    group_by,
                    groups,
                    group_header,
                    counters,
                    total_label,
                } => {
                    let groups = self.groups(registrations, group_by, groups, &selected);
                    vec![self.tally(&spec, group_by, groups, group_header, counters, total_label, &selected)]
                }
                Layout::Raw => {
                    let columns = raw_columns(registrations, &selected);
                    vec![self.listing(&spec, &spec.name, spec.subdir.clone(), &columns, &[], &selected)]
                }
            };

            for document in produced {
                tracing::debug!("Document '{}' has {} rows", document.key(), document.rows.len());
                documents.insert(document.key(), document);
            }
        }
        documents
    }

    /// Every group a split or tally reports: the configured ones, the
    /// choices of the grouping question and any other value answered.
    fn groups(
        &self,
        set: &RegistrationSet,
        group_by: &Source,
        configured: &[String],
        selected: &[&Registration],
    ) -> BTreeSet<String> {
        let keys = group_by.answer_keys();
        let choices = set
            .questions()
            .iter()
            .filter(|q| keys.contains(&q.key.as_str()))
            .flat_map(|q| q.options.iter());
        configured
            .iter()
            .chain(choices)
            .map(|g| g.trim().to_string())
            .chain(selected.iter().map(|r| self.group_value(r, group_by)))
            .filter(|g| !g.is_empty())
            .collect()
    }

    fn listing(
        &self,
        spec: &DocumentSpec,
        name: &str,
        subdir: Option<String>,
        columns: &[ColumnSpec],
        sort_by: &[String],
        selected: &[&Registration],
    ) -> DocumentRows {
        let mut rows: Vec<OutputRow> = selected
            .iter()
            .map(|registration| OutputRow {
                registration_id: Some(registration.id),
                cells: columns
                    .iter()
                    .map(|column| self.cell(registration, &column.source, column.kind))
                    .collect(),
            })
            .collect();

        let sort_indices: Vec<usize> = sort_by
            .iter()
            .filter_map(|header| columns.iter().position(|c| &c.header == header))
            .collect();
        rows.sort_by(|a, b| {
            sort_indices
                .iter()
                .map(|&i| compare_cells(&a.cells[i], &b.cells[i]))
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.registration_id.cmp(&b.registration_id))
        });

        DocumentRows {
            name: name.to_string(),
            subdir,
            headers: columns.iter().map(|c| c.header.clone()).collect(),
            rows,
            autofilter: spec.autofilter,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn split(
        &self,
        spec: &DocumentSpec,
        columns: &[ColumnSpec],
        sort_by: &[String],
        group_by: &Source,
        groups: BTreeSet<String>,
        keep_group_column: bool,
        selected: &[&Registration],
    ) -> Vec<DocumentRows> {
        let mut members: BTreeMap<String, Vec<&Registration>> =
            groups.into_iter().map(|g| (g, Vec::new())).collect();
        for &registration in selected {
            if let Some(group) = members.get_mut(&self.group_value(registration, group_by)) {
                group.push(registration);
            }
        }

        let columns: Vec<ColumnSpec> = columns
            .iter()
            .filter(|c| keep_group_column || &c.source != group_by)
            .cloned()
            .collect();
        let sort_by: Vec<String> = sort_by
            .iter()
            .filter(|h| columns.iter().any(|c| &c.header == *h))
            .cloned()
            .collect();
        let subdir = Some(spec.subdir.clone().unwrap_or_else(|| spec.name.clone()));

        // 空的分組也要輸出，覆蓋上次的檔案
        members
            .into_iter()
            .map(|(group, members)| {
                self.listing(spec, &group, subdir.clone(), &columns, &sort_by, &members)
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn tally(
        &self,
        spec: &DocumentSpec,
        group_by: &Source,
        groups: BTreeSet<String>,
        group_header: &str,
        counters: &[Counter],
        total_label: &str,
        selected: &[&Registration],
    ) -> DocumentRows {
        let count_row = |label: &str, members: &[&Registration]| {
            let counts: Vec<usize> = counters
                .iter()
                .map(|counter| members.iter().filter(|r| counter.select.matches(r)).count())
                .collect();
            let total: usize = counts.iter().sum();
            let mut cells = vec![Cell::Text(label.to_string())];
            cells.extend(counts.into_iter().map(|c| Cell::Number(c as f64)));
            cells.push(Cell::Number(total as f64));
            OutputRow {
                registration_id: None,
                cells,
            }
        };

        let mut rows = vec![count_row(total_label, selected)];
        for group in &groups {
            let members: Vec<&Registration> = selected
                .iter()
                .copied()
                .filter(|r| &self.group_value(r, group_by) == group)
                .collect();
            rows.push(count_row(group, &members[..]));
        }

        let mut headers = vec![group_header.to_string()];
        headers.extend(counters.iter().map(|c| c.header.clone()));
        headers.push(total_label.to_string());

        DocumentRows {
            name: spec.name.clone(),
            subdir: spec.subdir.clone(),
            headers,
            rows,
            autofilter: spec.autofilter,
        }
    }

    fn group_value(&self, registration: &Registration, source: &Source) -> String {
        self.cell(registration, source, CellKind::Text)
            .display()
            .trim()
            .to_string()
    }

    /// Typed cell for one column. Missing values become [`Cell::Empty`].
    pub fn cell(&self, registration: &Registration, source: &Source, kind: CellKind) -> Cell {
        match read(registration, source) {
            None => Cell::Empty,
            Some(value) => self.shape(value, kind),
        }
    }

    fn shape(&self, value: Value, kind: CellKind) -> Cell {
        match (value, kind) {
            (Value::Text(text), CellKind::Text) => Cell::Text(text),
            (Value::Number(n), CellKind::Text) => Cell::Text(Cell::Number(n).display()),
            (Value::Timestamp(ts), CellKind::Text) => {
                Cell::Text(self.local(ts).format("%Y-%m-%d %H:%M").to_string())
            }
            (Value::Number(n), CellKind::Number) => Cell::Number(n),
            (Value::Text(text), CellKind::Number) => match parse_number(&text) {
                Some(n) => Cell::Number(n),
                None => Cell::Text(text),
            },
            (Value::Timestamp(ts), CellKind::Number) => Cell::Number(ts.timestamp() as f64),
            (Value::Timestamp(ts), CellKind::Date) => Cell::DateTime(self.local(ts)),
            (Value::Text(text), CellKind::Date) => match self.parse_date(&text) {
                Some(dt) => Cell::DateTime(dt),
                None => Cell::Text(text),
            },
            (Value::Number(n), CellKind::Date) => Cell::Number(n),
        }
    }

    fn local(&self, ts: DateTime<Utc>) -> NaiveDateTime {
        ts.with_timezone(&self.timezone).naive_local()
    }

    fn parse_date(&self, text: &str) -> Option<NaiveDateTime> {
        let text = text.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
            return Some(self.local(ts.with_timezone(&Utc)));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M") {
            return Some(dt);
        }
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    }
}

fn read(registration: &Registration, source: &Source) -> Option<Value> {
    let text = |s: &str| {
        let trimmed = s.trim();
        (!trimmed.is_empty()).then(|| Value::Text(trimmed.to_string()))
    };
    match source {
        Source::Field(field) => match field {
            Field::Id => Some(Value::Number(registration.id as f64)),
            Field::OrderCode => text(&registration.order_code),
            Field::Status => text(registration.status.label()),
            Field::Email => registration.email.as_deref().and_then(text),
            Field::Item => text(&registration.item),
            Field::GivenName => text(&registration.given_name),
            Field::FamilyName => text(&registration.family_name),
            Field::Created => Some(Value::Timestamp(registration.created)),
            Field::Price => registration.price.map(Value::Number),
            Field::Total => registration.order_total.map(Value::Number),
            Field::InvoiceName => text(&registration.invoice.name),
            Field::InvoiceCompany => text(&registration.invoice.company),
            Field::InvoiceStreet => text(&registration.invoice.street),
            Field::InvoiceZipcode => text(&registration.invoice.zipcode),
            Field::InvoiceCity => text(&registration.invoice.city),
            Field::InvoiceCountry => text(&registration.invoice.country),
            Field::InvoiceVatId => text(&registration.invoice.vat_id),
        },
        Source::Answer { answer } => registration
            .answer(answer)
            .filter(|a| !a.is_blank())
            .map(|a| Value::Text(a.as_text().trim().to_string())),
        Source::FirstOf { first_of } => first_of.iter().find_map(|s| read(registration, s)),
    }
}

fn parse_number(text: &str) -> Option<f64> {
    let normalized = text.trim().replace(',', ".");
    normalized.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Built-in fields, then one column per catalogue question headed by its
/// text, then answers to questions missing from the catalogue.
fn raw_columns(set: &RegistrationSet, selected: &[&Registration]) -> Vec<ColumnSpec> {
    let number = |header: &str, field| ColumnSpec::new(header, Source::Field(field), CellKind::Number);
    let mut columns = vec![
        number("id", Field::Id),
        ColumnSpec::text("order_code", Field::OrderCode),
        ColumnSpec::text("status", Field::Status),
        ColumnSpec::text("email", Field::Email),
        number("total", Field::Total),
        ColumnSpec::new("date", Source::Field(Field::Created), CellKind::Date),
        ColumnSpec::text("invoice_name", Field::InvoiceName),
        ColumnSpec::text("invoice_company", Field::InvoiceCompany),
        ColumnSpec::text("invoice_street", Field::InvoiceStreet),
        ColumnSpec::text("invoice_zipcode", Field::InvoiceZipcode),
        ColumnSpec::text("invoice_city", Field::InvoiceCity),
        ColumnSpec::text("invoice_country", Field::InvoiceCountry),
        ColumnSpec::text("invoice_vat_id", Field::InvoiceVatId),
        ColumnSpec::text("item_name", Field::Item),
        ColumnSpec::text("attendee_firstname", Field::GivenName),
        ColumnSpec::text("attendee_lastname", Field::FamilyName),
        number("price", Field::Price),
    ];
    let mut headers: HashSet<String> = columns.iter().map(|c| c.header.clone()).collect();

    let catalogued: HashSet<&str> = set.questions().iter().map(|q| q.key.as_str()).collect();
    let uncatalogued: BTreeSet<&String> = selected
        .iter()
        .flat_map(|r| r.answers.keys())
        .filter(|key| !catalogued.contains(key.as_str()))
        .collect();

    let questions = set
        .questions()
        .iter()
        .map(|q| {
            let text = q.text.trim();
            (if text.is_empty() { q.key.as_str() } else { text }, q.key.as_str())
        })
        .chain(uncatalogued.into_iter().map(|key| (key.as_str(), key.as_str())));
    for (header, key) in questions {
        let header = unique_header(&mut headers, header);
        columns.push(ColumnSpec::new(&header, Source::answer(key), CellKind::Text));
    }
    columns
}

/// `header`, or the first free `header (#n)` from 2 upwards.
fn unique_header(taken: &mut HashSet<String>, header: &str) -> String {
    let mut candidate = header.to_string();
    let mut n = 2;
    while taken.contains(&candidate) {
        candidate = format!("{} (#{})", header, n);
        n += 1;
    }
    taken.insert(candidate.clone());
    candidate
}

fn kind_rank(cell: &Cell) -> u8 {
    match cell {
        Cell::Number(_) => 0,
        Cell::DateTime(_) => 1,
        Cell::Text(_) => 2,
        Cell::Empty => 3,
    }
}

/// Empty cells sort last; text compares case-insensitively.
fn compare_cells(a: &Cell, b: &Cell) -> Ordering {
    match (a, b) {
        (Cell::Number(x), Cell::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Cell::DateTime(x), Cell::DateTime(y)) => x.cmp(y),
        (Cell::Text(x), Cell::Text(y)) => x
            .to_lowercase()
            .cmp(&y.to_lowercase())
            .then_with(|| x.cmp(y)),
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{Answer, InvoiceAddress, OrderStatus, Question};
    use chrono::TimeZone;

    fn registration(id: u64, status: OrderStatus, answers: &[(&str, &str)]) -> Registration {
        Registration {
            id,
            order_code: format!("ORD{}", id),
            status,
            email: Some(format!("p{}@example.com", id)),
            created: Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap(),
            item: "Participant".to_string(),
            given_name: format!("Given{}", id),
            family_name: format!("Family{}", id),
            price: Some(20.0),
            order_total: Some(20.0),
            invoice: InvoiceAddress::default(),
            answers: answers
                .iter()
                .map(|(k, v)| (k.to_string(), Answer::Single(v.to_string())))
                .collect(),
        }
    }

    fn listing(name: &str, select: Selector, columns: Vec<ColumnSpec>) -> DocumentSpec {
        DocumentSpec {
            name: name.to_string(),
            subdir: None,
            select,
            autofilter: false,
            layout: Layout::Listing {
                columns,
                sort_by: vec![],
            },
        }
    }

    fn question(id: u64, key: &str, text: &str, options: &[&str]) -> Question {
        Question {
            id,
            key: key.to_string(),
            text: text.to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
            position: id as i64,
        }
    }

    fn transformer() -> Transformer {
        Transformer::new(chrono_tz::Europe::Berlin)
    }

    #[test]
    fn test_paid_and_all_documents() {
        let set = RegistrationSet::new(vec![
            registration(2, OrderStatus::Canceled, &[]),
            registration(1, OrderStatus::Paid, &[("shirt_size", "M")]),
        ]);
        let columns = vec![
            ColumnSpec::new("id", Source::Field(Field::Id), CellKind::Number),
            ColumnSpec::new("shirt_size", Source::answer("shirt_size"), CellKind::Text),
        ];
        let specs = vec![
            listing(
                "Paid",
                Selector::StatusIn(vec![OrderStatus::Paid]),
                columns.clone(),
            ),
            listing("All", Selector::All, columns),
        ];

        let documents = transformer().transform(&set, &specs);

        let paid = &documents["Paid"];
        assert_eq!(paid.rows.len(), 1);
        assert_eq!(
            paid.rows[0].cells,
            vec![Cell::Number(1.0), Cell::Text("M".to_string())]
        );

        let all = &documents["All"];
        let ids: Vec<_> = all.rows.iter().map(|r| r.registration_id).collect();
        assert_eq!(ids, vec![Some(1), Some(2)]);
        assert_eq!(all.rows[1].cells[1], Cell::Empty);
    }

    #[test]
    fn test_transform_is_deterministic_and_order_independent() {
        let a = registration(5, OrderStatus::Paid, &[("town", "Berg")]);
        let b = registration(3, OrderStatus::Pending, &[("town", "Aach")]);
        let c = registration(9, OrderStatus::Paid, &[("town", "Berg")]);
        let specs = crate::domain::documents::default_documents();

        let first = transformer().transform(
            &RegistrationSet::new(vec![a.clone(), b.clone(), c.clone()]),
            &specs,
        );
        let second = transformer().transform(&RegistrationSet::new(vec![c, a, b]), &specs);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_sort_by_columns_with_empty_last() {
        let mut with_name = registration(1, OrderStatus::Paid, &[]);
        with_name.family_name = "zeller".to_string();
        let mut upper = registration(2, OrderStatus::Paid, &[]);
        upper.family_name = "Albrecht".to_string();
        let mut blank = registration(3, OrderStatus::Paid, &[]);
        blank.family_name = String::new();

        let spec = DocumentSpec {
            name: "Sorted".to_string(),
            subdir: None,
            select: Selector::All,
            autofilter: false,
            layout: Layout::Listing {
                columns: vec![ColumnSpec::text("Family name", Field::FamilyName)],
                sort_by: vec!["Family name".to_string()],
            },
        };
        let documents =
            transformer().transform(&RegistrationSet::new(vec![with_name, upper, blank]), &[spec]);
        let ids: Vec<_> = documents["Sorted"]
            .rows
            .iter()
            .map(|r| r.registration_id.unwrap())
            .collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn test_first_of_and_typed_cells() {
        let r = registration(1, OrderStatus::Paid, &[("phone", "0711 123"), ("age", "12")]);
        let t = transformer();

        let phone = Source::FirstOf {
            first_of: vec![Source::answer("phone_parents"), Source::answer("phone")],
        };
        assert_eq!(
            t.cell(&r, &phone, CellKind::Text),
            Cell::Text("0711 123".to_string())
        );
        assert_eq!(
            t.cell(&r, &Source::answer("age"), CellKind::Number),
            Cell::Number(12.0)
        );
        assert_eq!(
            t.cell(&r, &Source::answer("missing"), CellKind::Number),
            Cell::Empty
        );
        // 10:00 UTC is 12:00 in Berlin during summer time
        assert_eq!(
            t.cell(&r, &Source::Field(Field::Created), CellKind::Date),
            Cell::DateTime(
                NaiveDate::from_ymd_opt(2025, 6, 1)
                    .unwrap()
                    .and_hms_opt(12, 0, 0)
                    .unwrap()
            )
        );
    }

    #[test]
    fn test_split_by_answer() {
        let set = RegistrationSet::new(vec![
            registration(1, OrderStatus::Paid, &[("town", "Berg")]),
            registration(2, OrderStatus::Paid, &[("town", "Aach")]),
            registration(3, OrderStatus::Paid, &[("town", "Berg")]),
            registration(4, OrderStatus::Paid, &[]),
        ]);
        let spec = DocumentSpec {
            name: "Towns".to_string(),
            subdir: Some("By_Town".to_string()),
            select: Selector::active(),
            autofilter: false,
            layout: Layout::Split {
                columns: vec![
                    ColumnSpec::new("Town", Source::answer("town"), CellKind::Text),
                    ColumnSpec::text("Family name", Field::FamilyName),
                ],
                sort_by: vec!["Family name".to_string()],
                group_by: Source::answer("town"),
                groups: vec![],
                keep_group_column: false,
            },
        };

        let documents = transformer().transform(&set, &[spec]);
        let keys: Vec<_> = documents.keys().cloned().collect();
        assert_eq!(keys, vec!["By_Town/Aach", "By_Town/Berg"]);

        let berg = &documents["By_Town/Berg"];
        assert_eq!(berg.headers, vec!["Family name"]);
        assert_eq!(berg.rows.len(), 2);
    }

    #[test]
    fn test_tally_counts() {
        let mut staff = registration(3, OrderStatus::Paid, &[("town", "Aach")]);
        staff.item = "Staff".to_string();
        let set = RegistrationSet::new(vec![
            registration(1, OrderStatus::Paid, &[("town", "Berg")]),
            registration(2, OrderStatus::Paid, &[("town", "Aach")]),
            staff,
            registration(4, OrderStatus::Canceled, &[("town", "Aach")]),
        ]);
        let spec = DocumentSpec {
            name: "Numbers".to_string(),
            subdir: None,
            select: Selector::active(),
            autofilter: false,
            layout: Layout::Tally {
                group_by: Source::answer("town"),
                groups: vec![],
                group_header: "Town".to_string(),
                counters: vec![
                    Counter {
                        header: "Participants".to_string(),
                        select: Selector::ItemContains("participant".to_string()),
                    },
                    Counter {
                        header: "Staff".to_string(),
                        select: Selector::ItemContains("staff".to_string()),
                    },
                ],
                total_label: "Total".to_string(),
            },
        };

        let documents = transformer().transform(&set, &[spec]);
        let numbers = &documents["Numbers"];
        assert_eq!(numbers.headers, vec!["Town", "Participants", "Staff", "Total"]);
        let rendered: Vec<Vec<String>> = numbers
            .rows
            .iter()
            .map(|r| r.cells.iter().map(|c| c.display()).collect())
            .collect();
        assert_eq!(
            rendered,
            vec![
                vec!["Total", "2", "1", "3"],
                vec!["Aach", "1", "1", "2"],
                vec!["Berg", "1", "0", "1"],
            ]
        );
    }

    #[test]
    fn test_raw_includes_every_question() {
        let set = RegistrationSet::new(vec![
            registration(1, OrderStatus::Paid, &[("b_question", "x")]),
            registration(2, OrderStatus::Canceled, &[("a_question", "y")]),
        ]);
        let spec = DocumentSpec {
            name: "Raw_Data".to_string(),
            subdir: None,
            select: Selector::All,
            autofilter: true,
            layout: Layout::Raw,
        };
        let documents = transformer().transform(&set, &[spec]);
        let raw = &documents["Raw_Data"];
        assert_eq!(raw.rows.len(), 2);
        assert_eq!(
            &raw.headers[raw.headers.len() - 2..],
            &["a_question".to_string(), "b_question".to_string()]
        );
    }

    fn rendered(document: &DocumentRows) -> Vec<Vec<String>> {
        document
            .rows
            .iter()
            .map(|r| r.cells.iter().map(|c| c.display()).collect())
            .collect()
    }

    #[test]
    fn test_emptied_group_is_still_produced() {
        let specs = vec![
            DocumentSpec {
                name: "Towns".to_string(),
                subdir: Some("By_Town".to_string()),
                select: Selector::active(),
                autofilter: false,
                layout: Layout::Split {
                    columns: vec![ColumnSpec::text("Family name", Field::FamilyName)],
                    sort_by: vec![],
                    group_by: Source::answer("town"),
                    groups: vec!["Nord".to_string()],
                    keep_group_column: false,
                },
            },
            DocumentSpec {
                name: "Numbers".to_string(),
                subdir: None,
                select: Selector::active(),
                autofilter: false,
                layout: Layout::Tally {
                    group_by: Source::answer("town"),
                    groups: vec![],
                    group_header: "Town".to_string(),
                    counters: vec![Counter {
                        header: "Participants".to_string(),
                        select: Selector::All,
                    }],
                    total_label: "Total".to_string(),
                },
            },
        ];
        let catalogue = vec![question(7, "town", "Ortschaft", &["Aach", "Berg", "Zell"])];

        let before = RegistrationSet::new(vec![
            registration(1, OrderStatus::Paid, &[("town", "Aach")]),
            registration(2, OrderStatus::Paid, &[("town", "Berg")]),
        ])
        .with_questions(catalogue.clone());
        let after = RegistrationSet::new(vec![
            registration(1, OrderStatus::Paid, &[("town", "Aach")]),
            registration(2, OrderStatus::Canceled, &[("town", "Berg")]),
        ])
        .with_questions(catalogue);

        let first = transformer().transform(&before, &specs);
        let second = transformer().transform(&after, &specs);

        let expected = vec![
            "By_Town/Aach",
            "By_Town/Berg",
            "By_Town/Nord",
            "By_Town/Zell",
            "Numbers",
        ];
        assert_eq!(first.keys().collect::<Vec<_>>(), expected);
        assert_eq!(second.keys().collect::<Vec<_>>(), expected);
        assert_eq!(first["By_Town/Berg"].rows.len(), 1);
        assert!(second["By_Town/Berg"].rows.is_empty());
        assert_eq!(second["By_Town/Berg"].headers, vec!["Family name"]);

        assert_eq!(
            rendered(&second["Numbers"]),
            vec![
                vec!["Total", "1", "1"],
                vec!["Aach", "1", "1"],
                vec!["Berg", "0", "0"],
                vec!["Nord", "0", "0"],
                vec!["Zell", "0", "0"],
            ]
        );
    }

    #[test]
    fn test_raw_headers_come_from_the_catalogue() {
        let mut r = registration(
            1,
            OrderStatus::Paid,
            &[("town", "Aach"), ("question_8", "Berg"), ("legacy", "x")],
        );
        r.invoice.city = "Stuttgart".to_string();
        let set = RegistrationSet::new(vec![r]).with_questions(vec![
            question(7, "town", "Ortschaft", &[]),
            question(8, "question_8", "Ortschaft", &[]),
            question(9, "diet", "Ernährung", &[]),
            question(10, "contact", "email", &[]),
        ]);
        let spec = DocumentSpec {
            name: "Raw_Data".to_string(),
            subdir: None,
            select: Selector::All,
            autofilter: true,
            layout: Layout::Raw,
        };

        let raw = &transformer().transform(&set, &[spec])["Raw_Data"];
        assert_eq!(
            &raw.headers[raw.headers.len() - 5..],
            &["Ortschaft", "Ortschaft (#2)", "Ernährung", "email (#2)", "legacy"]
        );
        let cells = rendered(raw).remove(0);
        assert_eq!(cells[cells.len() - 5..], ["Aach", "Berg", "", "", "x"]);
        let city = raw.headers.iter().position(|h| h == "invoice_city").unwrap();
        assert_eq!(cells[city], "Stuttgart");
        let total = raw.headers.iter().position(|h| h == "total").unwrap();
        assert_eq!(raw.rows[0].cells[total], Cell::Number(20.0));
    }

    #[test]
    fn test_answers_are_found_by_question_text() {
        let set = RegistrationSet::new(vec![
            registration(1, OrderStatus::Paid, &[("town", "Berg")]),
            registration(2, OrderStatus::Paid, &[("town", "Aach")]),
            registration(3, OrderStatus::Paid, &[("question_8", "Berg")]),
        ])
        .with_questions(vec![
            question(7, "town", "Ortschaft", &[]),
            question(8, "question_8", "Ortschaft", &[]),
        ]);
        let spec = listing(
            "Berg",
            Selector::AnswerEquals {
                question: "ortschaft".to_string(),
                value: "Berg".to_string(),
            },
            vec![ColumnSpec::new("Town", Source::answer("Ortschaft"), CellKind::Text)],
        );

        let documents = transformer().transform(&set, &[spec]);
        let berg = &documents["Berg"];
        let ids: Vec<_> = berg.rows.iter().map(|r| r.registration_id).collect();
        assert_eq!(ids, vec![Some(1), Some(3)]);
        assert_eq!(rendered(berg), vec![vec!["Berg"], vec!["Berg"]]);
    }
}
