//! Student directory access
//!
//! Read-side models and the [`StudentDirectory`] contract the conversation
//! core queries, plus a PostgREST-style REST implementation matching the
//! hosted directory this bot runs against.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Errors from the student directory
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Transport-level failure reaching the directory
    #[error("directory request failed: {0}")]
    Request(String),
    /// The directory answered with something we could not decode
    #[error("directory response invalid: {0}")]
    Decode(String),
    /// The directory is not configured for this deployment
    #[error("directory not configured: {0}")]
    Config(&'static str),
}

/// One student as listed in the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Student {
    /// 15-digit exam number, the unique key
    pub examno: String,
    /// Full Arabic name
    pub name: String,
    /// Governorate the student sat the exam in
    pub governorate: Option<String>,
    /// School name
    pub school: Option<String>,
    /// Raw gender code as stored (`M`/`F`/`1`/`2`)
    pub gender: Option<String>,
}

/// One graded subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectScore {
    /// Subject display name
    pub name: String,
    /// Score as stored (kept textual; some boards grade non-numerically)
    pub score: String,
}

/// A student's stored exam outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamResult {
    /// Exam number this result belongs to
    pub examno: String,
    /// Pass/fail/deferred case marker
    pub status: Option<String>,
    /// Final grade
    pub final_grade: Option<String>,
    /// Final percentage
    pub final_rate: Option<String>,
    /// Per-subject scores, in board order
    pub subjects: Vec<SubjectScore>,
}

/// A page of name-search matches
#[derive(Debug, Clone, Default)]
pub struct SearchResultSet {
    /// Matches for this page, at most the requested limit
    pub students: Vec<Student>,
    /// Total matches across all pages
    pub total_count: usize,
    /// Whether matches beyond this page exist
    pub has_more: bool,
}

/// Query contract against the student/result records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StudentDirectory: Send + Sync {
    /// Case-insensitive substring search on the name, optionally narrowed to
    /// one governorate
    async fn find_by_name<'a>(
        &self,
        name: &str,
        governorate: Option<&'a str>,
        limit: usize,
        offset: usize,
    ) -> Result<SearchResultSet, DirectoryError>;

    /// Exact lookup by exam number
    async fn find_by_exam_number(&self, examno: &str)
        -> Result<Option<Student>, DirectoryError>;

    /// The locally stored exam result, if the board already published it
    async fn find_result(&self, examno: &str) -> Result<Option<ExamResult>, DirectoryError>;

    /// Distinct governorates present in the directory
    async fn list_governorates(&self) -> Result<Vec<String>, DirectoryError>;
}

// Wide row shapes as the REST endpoint returns them.

#[derive(Debug, Deserialize)]
struct StudentRow {
    examno: String,
    aname: Option<String>,
    gov_name: Option<String>,
    sch_name: Option<String>,
    sexcode: Option<String>,
}

impl From<StudentRow> for Student {
    fn from(row: StudentRow) -> Self {
        Self {
            examno: row.examno,
            name: row.aname.unwrap_or_default(),
            governorate: row.gov_name,
            school: row.sch_name,
            gender: row.sexcode,
        }
    }
}

/// Results come back as one row with `sub1_name`/`sub1_score` .. `sub9_*`
/// columns; the extras map catches those without spelling out 27 fields.
#[derive(Debug, Deserialize)]
struct ResultRow {
    examno: String,
    stucases: Option<String>,
    finalgrd: Option<String>,
    finalrate: Option<String>,
    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

impl ResultRow {
    fn into_result(self) -> ExamResult {
        let mut subjects = Vec::new();
        for i in 1..=9 {
            let name = self.extra.get(&format!("sub{i}_name")).and_then(as_text);
            let score = self.extra.get(&format!("sub{i}_score")).and_then(as_text);
            if let (Some(name), Some(score)) = (name, score) {
                subjects.push(SubjectScore { name, score });
            }
        }
        ExamResult {
            examno: self.examno,
            status: self.stucases,
            final_grade: self.finalgrd,
            final_rate: self.finalrate,
            subjects,
        }
    }
}

fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// PostgREST-style client for the hosted student directory
pub struct RestStudentDirectory {
    http: reqwest::Client,
    base_url: String,
}

impl RestStudentDirectory {
    /// Build a client for the directory endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL or key is missing, or the HTTP client
    /// cannot be constructed.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, DirectoryError> {
        if base_url.is_empty() {
            return Err(DirectoryError::Config("directory_url"));
        }
        if api_key.is_empty() {
            return Err(DirectoryError::Config("directory_api_key"));
        }

        let mut headers = HeaderMap::new();
        let key_value = HeaderValue::from_str(api_key)
            .map_err(|_| DirectoryError::Config("directory_api_key"))?;
        headers.insert("apikey", key_value.clone());
        let bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| DirectoryError::Config("directory_api_key"))?;
        headers.insert(reqwest::header::AUTHORIZATION, bearer);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| DirectoryError::Request(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_rows<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
        count_exact: bool,
    ) -> Result<(Vec<T>, Option<usize>), DirectoryError> {
        let url = format!("{}/{table}", self.base_url);
        let mut req = self.http.get(&url).query(query);
        if count_exact {
            req = req.header("Prefer", "count=exact");
        }

        let resp = req
            .send()
            .await
            .map_err(|e| DirectoryError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| DirectoryError::Request(e.to_string()))?;

        let total = resp
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total);

        let rows = resp
            .json::<Vec<T>>()
            .await
            .map_err(|e| DirectoryError::Decode(e.to_string()))?;
        Ok((rows, total))
    }
}

/// `content-range: 0-4/87` → 87
fn parse_content_range_total(raw: &str) -> Option<usize> {
    raw.rsplit('/').next()?.parse().ok()
}

#[async_trait]
impl StudentDirectory for RestStudentDirectory {
    async fn find_by_name<'a>(
        &self,
        name: &str,
        governorate: Option<&'a str>,
        limit: usize,
        offset: usize,
    ) -> Result<SearchResultSet, DirectoryError> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("aname", format!("ilike.*{name}*")),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ];
        if let Some(gov) = governorate {
            query.push(("gov_name", format!("eq.{gov}")));
        }

        let (rows, total) = self
            .get_rows::<StudentRow>("students", &query, true)
            .await?;

        let students: Vec<Student> = rows.into_iter().map(Student::from).collect();
        let total_count = total.unwrap_or(students.len());
        Ok(SearchResultSet {
            has_more: total_count > offset + students.len(),
            total_count,
            students,
        })
    }

    async fn find_by_exam_number(
        &self,
        examno: &str,
    ) -> Result<Option<Student>, DirectoryError> {
        let query = vec![
            ("select", "*".to_string()),
            ("examno", format!("eq.{examno}")),
            ("limit", "1".to_string()),
        ];
        let (rows, _) = self
            .get_rows::<StudentRow>("students", &query, false)
            .await?;
        Ok(rows.into_iter().next().map(Student::from))
    }

    async fn find_result(&self, examno: &str) -> Result<Option<ExamResult>, DirectoryError> {
        let query = vec![
            ("select", "*".to_string()),
            ("examno", format!("eq.{examno}")),
            ("limit", "1".to_string()),
        ];
        let (rows, _) = self
            .get_rows::<ResultRow>("exam_results", &query, false)
            .await?;
        Ok(rows.into_iter().next().map(ResultRow::into_result))
    }

    async fn list_governorates(&self) -> Result<Vec<String>, DirectoryError> {
        #[derive(Deserialize)]
        struct GovRow {
            gov_name: Option<String>,
        }

        // The directory exposes a deduplicated view over the students table
        let query = vec![("select", "gov_name".to_string())];
        let (rows, _) = self
            .get_rows::<GovRow>("governorates", &query, false)
            .await?;

        let mut names: Vec<String> = rows.into_iter().filter_map(|r| r.gov_name).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}
