//! CSV data provider.
//!
//! Grounded in the teacher's `engine::executor::CsvSourceRuntime` (an atomic
//! row cursor shared across VUs) and `plan::model::CsvDataSource::from_csv_content`
//! for header parsing. Extended with the filter grammar, selection modes,
//! and exhaustion policy the teacher never needed for its single
//! round-robin-only data source.

use crate::error::ThrongarError;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    /// Each VU gets the next row in a process-wide round-robin cursor.
    Next,
    /// Each VU is assigned one row for its whole lifetime.
    Unique,
    /// A uniformly random row is picked per iteration.
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionPolicy {
    Cycle,
    StopVu,
}

/// A parsed, filtered, optionally-shuffled-once CSV dataset plus the shared
/// cursor state VUs draw rows from.
pub struct CsvProvider {
    headers: Vec<String>,
    rows: Vec<HashMap<String, String>>,
    cursor: AtomicU64,
    mode: SelectionMode,
    exhaustion: ExhaustionPolicy,
    unique_assignments: Mutex<HashMap<u32, usize>>,
}

impl CsvProvider {
    pub fn parse(
        content: &str,
        delimiter: u8,
        filter: Option<&str>,
        randomize: bool,
        mode: SelectionMode,
        exhaustion: ExhaustionPolicy,
    ) -> Result<Self, ThrongarError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(content.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| ThrongarError::ConfigInvalid(format!("CSV header read failed: {e}")))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        if headers.is_empty() {
            return Err(ThrongarError::ConfigInvalid("CSV has no columns".to_string()));
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| ThrongarError::ConfigInvalid(format!("CSV row read failed: {e}")))?;
            let mut row = HashMap::with_capacity(headers.len());
            for (h, v) in headers.iter().zip(record.iter()) {
                row.insert(h.clone(), v.to_string());
            }
            rows.push(row);
        }

        if let Some(expr) = filter {
            let predicate = parse_filter(expr)?;
            rows.retain(|row| predicate.matches(row));
        }

        if randomize {
            rows.shuffle(&mut rand::thread_rng());
        }

        if rows.is_empty() {
            return Err(ThrongarError::ConfigInvalid("CSV produced no rows after filtering".to_string()));
        }

        Ok(Self {
            headers,
            rows,
            cursor: AtomicU64::new(0),
            mode,
            exhaustion,
            unique_assignments: Mutex::new(HashMap::new()),
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Fetch the next row for `vu_id`. Returns `Ok(None)` when the provider
    /// is exhausted under `ExhaustionPolicy::StopVu` and the caller should
    /// end that VU's iteration loop.
    pub fn next_row(&self, vu_id: u32) -> Result<Option<HashMap<String, String>>, ThrongarError> {
        let len = self.rows.len() as u64;
        let index = match self.mode {
            SelectionMode::Random => rand::random::<u64>() % len,
            SelectionMode::Unique => {
                let mut assignments = self.unique_assignments.lock().unwrap();
                let idx = *assignments.entry(vu_id).or_insert_with(|| {
                    (self.cursor.fetch_add(1, Ordering::Relaxed) % len) as usize
                });
                idx as u64
            }
            SelectionMode::Next => {
                let raw = self.cursor.fetch_add(1, Ordering::Relaxed);
                if raw >= len && self.exhaustion == ExhaustionPolicy::StopVu {
                    return Ok(None);
                }
                raw % len
            }
        };
        Ok(Some(self.rows[index as usize].clone()))
    }
}

/// `<column> <op> <value>` combined with `AND`/`OR`, left-to-right, no
/// operator precedence — the smallest grammar that satisfies the spec's
/// filter requirement.
struct FilterExpr {
    clauses: Vec<(String, FilterOp, String)>,
    joins: Vec<Join>,
}

#[derive(Clone, Copy)]
enum Join {
    And,
    Or,
}

enum FilterOp {
    Eq,
    Ne,
    Contains,
}

impl FilterExpr {
    fn matches(&self, row: &HashMap<String, String>) -> bool {
        let mut result = eval_clause(&self.clauses[0], row);
        for (join, clause) in self.joins.iter().zip(self.clauses.iter().skip(1)) {
            let next = eval_clause(clause, row);
            result = match join {
                Join::And => result && next,
                Join::Or => result || next,
            };
        }
        result
    }
}

fn eval_clause((col, op, val): &(String, FilterOp, String), row: &HashMap<String, String>) -> bool {
    let actual = row.get(col).map(|s| s.as_str()).unwrap_or("");
    match op {
        FilterOp::Eq => actual == val,
        FilterOp::Ne => actual != val,
        FilterOp::Contains => actual.contains(val.as_str()),
    }
}

fn parse_filter(expr: &str) -> Result<FilterExpr, ThrongarError> {
    let tokens: Vec<&str> = expr.split_whitespace().collect();
    let mut clauses = Vec::new();
    let mut joins = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if i > 0 {
            let join = match tokens[i].to_uppercase().as_str() {
                "AND" => Join::And,
                "OR" => Join::Or,
                other => {
                    return Err(ThrongarError::ConfigInvalid(format!(
                        "expected AND/OR in CSV filter, found '{other}'"
                    )))
                }
            };
            joins.push(join);
            i += 1;
        }
        if i + 2 >= tokens.len() {
            return Err(ThrongarError::ConfigInvalid(format!(
                "malformed CSV filter expression: '{expr}'"
            )));
        }
        let col = tokens[i].to_string();
        let op = match tokens[i + 1] {
            "==" | "eq" => FilterOp::Eq,
            "!=" | "ne" => FilterOp::Ne,
            "contains" => FilterOp::Contains,
            other => {
                return Err(ThrongarError::ConfigInvalid(format!(
                    "unknown CSV filter operator '{other}'"
                )))
            }
        };
        let val = tokens[i + 2].trim_matches('"').to_string();
        clauses.push((col, op, val));
        i += 3;
    }
    if clauses.is_empty() {
        return Err(ThrongarError::ConfigInvalid("empty CSV filter expression".to_string()));
    }
    Ok(FilterExpr { clauses, joins })
}

/// Process-singleton registry keyed by canonicalized path so multiple
/// scenarios referencing the same CSV file share one parsed dataset
/// instead of re-parsing it per VU.
static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<CsvProvider>>>> = OnceLock::new();

pub fn registry() -> &'static Mutex<HashMap<String, Arc<CsvProvider>>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "name,role\nada,engineer\ngrace,engineer\nalan,researcher\n";

    #[test]
    fn parses_rows_and_headers() {
        let p = CsvProvider::parse(SAMPLE, b',', None, false, SelectionMode::Next, ExhaustionPolicy::Cycle).unwrap();
        assert_eq!(p.headers(), &["name", "role"]);
        assert_eq!(p.rows.len(), 3);
    }

    #[test]
    fn next_mode_cycles() {
        let p = CsvProvider::parse(SAMPLE, b',', None, false, SelectionMode::Next, ExhaustionPolicy::Cycle).unwrap();
        let r0 = p.next_row(1).unwrap().unwrap();
        let r1 = p.next_row(1).unwrap().unwrap();
        let r2 = p.next_row(1).unwrap().unwrap();
        let r3 = p.next_row(1).unwrap().unwrap();
        assert_eq!(r0["name"], "ada");
        assert_eq!(r1["name"], "grace");
        assert_eq!(r2["name"], "alan");
        assert_eq!(r3["name"], "ada");
    }

    #[test]
    fn next_mode_stop_vu_exhausts() {
        let p = CsvProvider::parse(SAMPLE, b',', None, false, SelectionMode::Next, ExhaustionPolicy::StopVu).unwrap();
        for _ in 0..3 {
            assert!(p.next_row(1).unwrap().is_some());
        }
        assert!(p.next_row(1).unwrap().is_none());
    }

    #[test]
    fn unique_mode_sticks_per_vu() {
        let p = CsvProvider::parse(SAMPLE, b',', None, false, SelectionMode::Unique, ExhaustionPolicy::Cycle).unwrap();
        let first = p.next_row(5).unwrap().unwrap();
        let second = p.next_row(5).unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn filter_eq_and_contains() {
        let p = CsvProvider::parse(
            SAMPLE,
            b',',
            Some("role == engineer"),
            false,
            SelectionMode::Next,
            ExhaustionPolicy::Cycle,
        )
        .unwrap();
        assert_eq!(p.rows.len(), 2);
    }

    #[test]
    fn filter_with_and_join() {
        let p = CsvProvider::parse(
            SAMPLE,
            b',',
            Some("role == engineer AND name == ada"),
            false,
            SelectionMode::Next,
            ExhaustionPolicy::Cycle,
        )
        .unwrap();
        assert_eq!(p.rows.len(), 1);
        assert_eq!(p.rows[0]["name"], "ada");
    }
}
