//! Job-search source: paginated HTTP extractor and the job-listing
//! transformer with its fixed staging schema.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

use crate::config::ApiConfig;
use crate::error::{EtlError, Result};
use crate::extract::{Extractor, Record};
use crate::transform::{StageSpec, Transformer};
use crate::value::{FieldValue, Row};

/// Hard cap on results a single search window can return; the API stops
/// paging past it no matter what `totalResults` claims.
pub const JOB_RESULT_CEILING: u64 = 1025;

/// Results requested per page.
pub const PAGE_LIMIT: u64 = 25;

/// Staging table the job transformer writes into.
pub const STAGE_TABLE_NAME: &str = "jobfeed_stage_jobs";

/// Output field name -> source record key, in staging column order.
const FIELD_SOURCES: [(&str, &str); 21] = [
    ("jobkey", "jobkey"),
    ("jobquery", "query"),
    ("jobtitle", "jobtitle"),
    ("company", "company"),
    ("city", "city"),
    ("state", "state"),
    ("country", "country"),
    ("latitude", "latitude"),
    ("longitude", "longitude"),
    ("language", "language"),
    ("formattedlocation", "formattedLocation"),
    ("jobsource", "source"),
    ("jobdate", "date"),
    ("url", "url"),
    ("onmousedown", "onmousedown"),
    ("sponsored", "sponsored"),
    ("expired", "expired"),
    ("indeedapply", "indeedApply"),
    ("formattedlocationfull", "formattedLocationFull"),
    ("formattedrelativetime", "formattedRelativeTime"),
    ("stations", "stations"),
];

const STAGE_TABLE_DDL: &str = "\
create table {table} (
    jobkey VARCHAR(30),
    jobquery VARCHAR(50),
    jobtitle VARCHAR(200),
    company VARCHAR(200),
    city VARCHAR(30),
    state VARCHAR(20),
    country VARCHAR(5),
    latitude FLOAT,
    longitude FLOAT,
    language VARCHAR(5),
    formattedlocation VARCHAR(30),
    jobsource VARCHAR(200),
    jobdate VARCHAR(40),
    url VARCHAR(300),
    onmousedown VARCHAR(30),
    sponsored BOOLEAN,
    expired BOOLEAN,
    indeedapply BOOLEAN,
    formattedlocationfull VARCHAR(50),
    formattedrelativetime VARCHAR(30),
    stations VARCHAR(30)
)";

/// One saved search: terms, location and how many days back to look.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub query: String,
    pub location: String,
    pub days_back: u32,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>, location: impl Into<String>, days_back: u32) -> Self {
        Self {
            query: query.into(),
            location: location.into(),
            days_back,
        }
    }
}

/// One page of the search API's JSON response.
#[derive(Debug, Deserialize)]
pub struct SearchPage {
    #[serde(rename = "totalResults", default)]
    pub total_results: u64,
    #[serde(default)]
    pub end: u64,
    #[serde(default)]
    pub results: Vec<Record>,
}

/// What to do after reading a page's envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageDecision {
    /// Buffer the page and fetch the next one.
    NextPage,
    /// Buffer the page; the window is exhausted after it.
    LastPage,
    /// Zero total results; nothing to buffer.
    Empty,
    /// The window exceeds the result ceiling; refuse it outright.
    Refused,
}

fn page_decision(total_results: u64, end: u64) -> PageDecision {
    if total_results == 0 {
        PageDecision::Empty
    } else if total_results > JOB_RESULT_CEILING {
        PageDecision::Refused
    } else if end >= total_results || end >= JOB_RESULT_CEILING {
        PageDecision::LastPage
    } else {
        PageDecision::NextPage
    }
}

/// Pulls job listings from the paginated search API one record at a
/// time, fetching pages lazily as the buffer drains.
pub struct JobSearchExtractor {
    client: reqwest::Client,
    base_url: String,
    publisher: String,
    search: SearchQuery,
    buffer: VecDeque<Record>,
    start: u64,
    exhausted: bool,
}

impl JobSearchExtractor {
    pub fn new(api: &ApiConfig, search: SearchQuery) -> Result<Self> {
        if api.base_url.is_empty() {
            return Err(EtlError::Config("api.base_url is required".into()));
        }
        if api.publisher.is_empty() {
            return Err(EtlError::Config("api.publisher is required".into()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: api.base_url.clone(),
            publisher: api.publisher.clone(),
            search,
            buffer: VecDeque::new(),
            start: 0,
            exhausted: false,
        })
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let params = [
            ("publisher", self.publisher.clone()),
            ("q", self.search.query.clone()),
            ("l", self.search.location.clone()),
            ("fromage", self.search.days_back.to_string()),
            ("start", self.start.to_string()),
            ("limit", PAGE_LIMIT.to_string()),
            ("format", "json".to_string()),
            ("v", "2".to_string()),
            ("latlong", "1".to_string()),
        ];
        debug!(
            "Fetching page start={} for '{}' in '{}'",
            self.start, self.search.query, self.search.location
        );

        let page = self
            .client
            .get(&self.base_url)
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .json::<SearchPage>()
            .await?;

        match page_decision(page.total_results, page.end) {
            PageDecision::Empty => {
                info!("No results for '{}'", self.search.query);
                self.exhausted = true;
            }
            PageDecision::Refused => {
                warn!(
                    "Too many results for '{}' ({} > {}); refusing the window",
                    self.search.query, page.total_results, JOB_RESULT_CEILING
                );
                self.exhausted = true;
            }
            decision => {
                // an empty page with more promised would loop forever
                if page.results.is_empty() || decision == PageDecision::LastPage {
                    self.exhausted = true;
                }
                self.start = page.end + 1;
                self.buffer.extend(page.results);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Extractor for JobSearchExtractor {
    async fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Ok(Some(record));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }
}

/// Normalizes raw job-listing records into the fixed 21-field staging
/// schema, one row per record. Missing keys become NULLs.
pub struct JobListingTransformer {
    spec: StageSpec,
}

impl JobListingTransformer {
    pub fn new() -> Self {
        Self {
            spec: StageSpec::new()
                .with_table_name(STAGE_TABLE_NAME)
                .with_ddl_template(STAGE_TABLE_DDL)
                .with_fields(FIELD_SOURCES.iter().map(|(field, _)| *field)),
        }
    }
}

impl Default for JobListingTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for JobListingTransformer {
    fn spec(&self) -> &StageSpec {
        &self.spec
    }

    fn transform(&self, record: &Record) -> Vec<Row> {
        let mut row = Row::with_capacity(FIELD_SOURCES.len());
        for (field, source) in FIELD_SOURCES {
            let value = record
                .get(source)
                .map(FieldValue::from_json)
                .unwrap_or(FieldValue::Null);
            row.insert(field.to_string(), value);
        }
        vec![row]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_decision_stops_on_zero_results() {
        assert_eq!(page_decision(0, 0), PageDecision::Empty);
    }

    #[test]
    fn test_page_decision_refuses_oversized_windows() {
        assert_eq!(page_decision(JOB_RESULT_CEILING + 1, 0), PageDecision::Refused);
    }

    #[test]
    fn test_page_decision_pages_until_exhausted() {
        assert_eq!(page_decision(100, 24), PageDecision::NextPage);
        assert_eq!(page_decision(100, 100), PageDecision::LastPage);
        assert_eq!(page_decision(100, 150), PageDecision::LastPage);
    }

    #[test]
    fn test_page_decision_honors_result_ceiling() {
        assert_eq!(
            page_decision(JOB_RESULT_CEILING, JOB_RESULT_CEILING),
            PageDecision::LastPage
        );
    }

    #[test]
    fn test_search_page_parses_api_envelope() {
        let page: SearchPage = serde_json::from_value(json!({
            "totalResults": 52,
            "end": 24,
            "results": [{"jobkey": "abc123", "jobtitle": "Data Engineer"}]
        }))
        .unwrap();
        assert_eq!(page.total_results, 52);
        assert_eq!(page.end, 24);
        assert_eq!(page.results.len(), 1);
    }

    #[test]
    fn test_search_page_defaults_missing_fields() {
        let page: SearchPage = serde_json::from_value(json!({})).unwrap();
        assert_eq!(page.total_results, 0);
        assert!(page.results.is_empty());
    }

    #[test]
    fn test_extractor_requires_endpoint_and_publisher() {
        let search = SearchQuery::new("rust", "austin, tx", 7);
        let missing_url = ApiConfig {
            base_url: String::new(),
            publisher: "123".to_string(),
        };
        assert!(JobSearchExtractor::new(&missing_url, search.clone()).is_err());

        let missing_publisher = ApiConfig {
            base_url: "http://api.example.com/search".to_string(),
            publisher: String::new(),
        };
        assert!(JobSearchExtractor::new(&missing_publisher, search).is_err());
    }

    fn job_record() -> Record {
        let value = json!({
            "jobkey": "abc123",
            "query": "data engineer",
            "jobtitle": "Senior Data Engineer",
            "company": "Acme",
            "city": "Austin",
            "state": "TX",
            "country": "US",
            "latitude": 30.27,
            "longitude": -97.74,
            "language": "en",
            "formattedLocation": "Austin, TX",
            "source": "Acme Careers",
            "date": "Fri, 15 Aug 2026 00:00:00 GMT",
            "url": "http://example.com/job/abc123",
            "onmousedown": "jobclick(this)",
            "sponsored": false,
            "expired": false,
            "indeedApply": true,
            "formattedLocationFull": "Austin, TX 78701",
            "formattedRelativeTime": "5 days ago",
            "stations": ""
        });
        match value {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_transform_emits_exactly_the_declared_fields() {
        let transformer = JobListingTransformer::new();
        let rows = transformer.transform(&job_record());
        assert_eq!(rows.len(), 1);

        let fields = transformer.output_fields().unwrap();
        assert_eq!(rows[0].len(), fields.len());
        for field in fields {
            assert!(rows[0].contains_key(field), "missing field {}", field);
        }
    }

    #[test]
    fn test_transform_renames_source_keys() {
        let transformer = JobListingTransformer::new();
        let row = transformer.transform(&job_record()).remove(0);
        assert_eq!(
            row["jobquery"],
            FieldValue::Text("data engineer".to_string())
        );
        assert_eq!(
            row["jobsource"],
            FieldValue::Text("Acme Careers".to_string())
        );
        assert_eq!(row["indeedapply"], FieldValue::Bool(true));
        assert_eq!(row["latitude"], FieldValue::Float(30.27));
    }

    #[test]
    fn test_transform_nulls_missing_keys() {
        let transformer = JobListingTransformer::new();
        let mut record = job_record();
        record.remove("company");
        record.remove("stations");
        let row = transformer.transform(&record).remove(0);
        assert!(row["company"].is_null());
        assert!(row["stations"].is_null());
        // present keys are untouched
        assert_eq!(row["jobkey"], FieldValue::Text("abc123".to_string()));
    }

    #[test]
    fn test_ddl_template_renders_against_table_name() {
        let transformer = JobListingTransformer::new();
        let ddl = transformer.stage_table_ddl().unwrap();
        assert!(ddl.starts_with("create table jobfeed_stage_jobs ("));
        assert!(ddl.contains("jobkey VARCHAR(30)"));
        assert!(!ddl.contains('{'));
    }
}
