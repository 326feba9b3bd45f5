use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::errors::DatasetError;
use crate::parser::parse_csv;

/// One CSV row. The first column is the id.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub fields: Vec<(String, String)>,
}

impl Record {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn as_map(&self) -> BTreeMap<String, String> {
        self.fields.iter().cloned().collect()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub headers: Vec<String>,
    pub records: Vec<Record>,
}

impl Dataset {
    /// Builds a dataset from parsed rows; the first row is the header.
    pub fn from_rows(rows: Vec<Vec<String>>) -> Result<Self, DatasetError> {
        let mut rows = rows.into_iter();
        let headers = rows.next().ok_or(DatasetError::Empty)?;

        let mut seen = HashSet::new();
        for (idx, name) in headers.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(DatasetError::EmptyHeader(idx + 1));
            }
            if !seen.insert(name.as_str()) {
                return Err(DatasetError::DuplicateHeader(name.clone()));
            }
        }

        let mut ids = HashSet::new();
        let mut records = Vec::new();
        for (idx, row) in rows.enumerate() {
            // rows are 1-based and the header is row 1
            let row_no = idx + 2;
            if row.len() != headers.len() {
                return Err(DatasetError::ColumnCount {
                    row: row_no,
                    expected: headers.len(),
                    found: row.len(),
                });
            }

            let id = row[0].clone();
            if id.is_empty() {
                return Err(DatasetError::EmptyId(row_no));
            }
            if !ids.insert(id.clone()) {
                return Err(DatasetError::DuplicateId { id, row: row_no });
            }

            records.push(Record {
                id,
                fields: headers.iter().cloned().zip(row).collect(),
            });
        }

        Ok(Self { headers, records })
    }

    pub fn parse(input: &str) -> Result<Self, DatasetError> {
        Self::from_rows(parse_csv(input)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| DatasetError::ReadFailed {
                path: path.display().to_string(),
                reason: err.to_string(),
            })?;
        Self::parse(&content)
    }

    /// Keeps the first `max` records.
    pub fn truncate(&mut self, max: usize) {
        self.records.truncate(max);
    }

    pub fn id_column(&self) -> &str {
        &self.headers[0]
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h == name)
    }

    pub fn column<'a>(&'a self, name: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.records
            .iter()
            .filter_map(move |r| r.get(name).map(|value| (r.id.as_str(), value)))
    }

    pub fn ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True when every value of the column is a finite number.
    pub fn is_numeric(&self, name: &str) -> bool {
        self.has_column(name)
            && !self.is_empty()
            && self.column(name).all(|(_, v)| parse_score(v).is_some())
    }

    /// First all-numeric column after the id, falling back to the id itself.
    pub fn numeric_column(&self) -> Option<&str> {
        self.headers
            .iter()
            .skip(1)
            .chain(self.headers.first())
            .find(|h| self.is_numeric(h))
            .map(String::as_str)
    }
}

pub fn parse_score(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "id,name,team,age\n1,ada,core,36\n2,grace,infra,45\n3,alan,core,41\n";

    #[test]
    fn test_parse_dataset() {
        let dataset = Dataset::parse(SAMPLE).unwrap();

        assert_eq!(dataset.headers, vec!["id", "name", "team", "age"]);
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.id_column(), "id");
        assert_eq!(dataset.ids(), vec!["1", "2", "3"]);
        assert_eq!(dataset.records[1].get("name"), Some("grace"));
        assert_eq!(dataset.records[1].get("missing"), None);
    }

    #[test]
    fn test_truncate_keeps_leading_records() {
        let mut dataset = Dataset::parse(SAMPLE).unwrap();
        dataset.truncate(2);
        assert_eq!(dataset.ids(), vec!["1", "2"]);

        dataset.truncate(10);
        assert_eq!(dataset.len(), 2);
    }

    #[test]
    fn test_numeric_column_skips_id() {
        let dataset = Dataset::parse(SAMPLE).unwrap();
        assert_eq!(dataset.numeric_column(), Some("age"));
        assert!(dataset.is_numeric("id"));
        assert!(!dataset.is_numeric("team"));
        assert!(!dataset.is_numeric("nope"));
    }

    #[test]
    fn test_numeric_column_falls_back_to_id() {
        let dataset = Dataset::parse("id,name\n10,ada\n20,grace\n").unwrap();
        assert_eq!(dataset.numeric_column(), Some("id"));

        let dataset = Dataset::parse("id,name\na,ada\nb,grace\n").unwrap();
        assert_eq!(dataset.numeric_column(), None);
    }

    #[test]
    fn test_parse_score_rejects_non_finite() {
        assert_eq!(parse_score(" 4.5 "), Some(4.5));
        assert_eq!(parse_score("NaN"), None);
        assert_eq!(parse_score("inf"), None);
        assert_eq!(parse_score("x"), None);
    }

    #[test]
    fn test_column_count_mismatch() {
        let result = Dataset::parse("id,name\n1,ada\n2\n");
        assert_eq!(
            result,
            Err(DatasetError::ColumnCount {
                row: 3,
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn test_header_errors() {
        assert_eq!(Dataset::parse(""), Err(DatasetError::Empty));
        assert_eq!(
            Dataset::parse("id,,name\n"),
            Err(DatasetError::EmptyHeader(2))
        );
        assert_eq!(
            Dataset::parse("id,name,name\n"),
            Err(DatasetError::DuplicateHeader("name".to_owned()))
        );
    }

    #[test]
    fn test_id_errors() {
        assert_eq!(
            Dataset::parse("id,name\n,ada\n"),
            Err(DatasetError::EmptyId(2))
        );
        assert_eq!(
            Dataset::parse("id,name\n1,ada\n1,grace\n"),
            Err(DatasetError::DuplicateId {
                id: "1".to_owned(),
                row: 3
            })
        );
    }

    #[test]
    fn test_record_serializes_in_column_order() {
        let dataset = Dataset::parse(SAMPLE).unwrap();
        let json = serde_json::to_string(&dataset.records[0]).unwrap();
        assert_eq!(json, r#"{"id":"1","name":"ada","team":"core","age":"36"}"#);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let dataset = Dataset::load(file.path()).await.unwrap();
        assert_eq!(dataset.len(), 3);
    }

    #[tokio::test]
    async fn test_load_bundled_records() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/data/records.csv");
        let dataset = Dataset::load(path).await.unwrap();

        assert_eq!(dataset.len(), 20);
        assert_eq!(dataset.headers[1], "country");
        assert_eq!(dataset.numeric_column(), Some("signup_year"));
        assert_eq!(dataset.records[12].get("last_name"), Some("McCarthy, Jr."));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Dataset::load(dir.path().join("absent.csv")).await;
        assert!(matches!(result, Err(DatasetError::ReadFailed { .. })));
    }
}
