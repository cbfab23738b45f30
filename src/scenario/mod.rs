//! Benchmark scenarios: loaders that turn published datasets into evaluation
//! instances for the clients in this crate.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::ServiceError;

mod coding;
mod patient_instructions;

pub use coding::{
    CodeEfficiencyScenario, CorrectCodeScenario, StudentCodingScenario, StudentStyleScenario,
};
pub use patient_instructions::PatientInstructionsScenario;

pub const CORRECT_TAG: &str = "correct";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Valid,
    Test,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub output: String,
    pub tags: Vec<String>,
}

impl Reference {
    pub fn correct(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            tags: vec![CORRECT_TAG.to_string()],
        }
    }

    pub fn is_correct(&self) -> bool {
        self.tags.iter().any(|tag| tag == CORRECT_TAG)
    }
}

/// One unit test of a programming question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unittest: Option<String>,
    #[serde(default)]
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std_in: Option<String>,
    #[serde(default)]
    pub output: String,
}

/// Question metadata that graders need alongside a coding instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDetails {
    pub question_template: String,
    pub test_cases: Vec<TestCase>,
    pub question_id: Option<String>,
    pub question_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    /// One pass (1) or fail (0) flag per unit test of the student's submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_correctness_pattern: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: Option<String>,
    pub input: String,
    pub references: Vec<Reference>,
    pub extra_data: Option<QuestionDetails>,
    pub split: Split,
}

pub trait Scenario {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn tags(&self) -> &'static [&'static str];

    fn get_instances(&self) -> Result<Vec<Instance>, ServiceError>;
}

/// Where remote dataset files come from.
pub trait DatasetSource: Send + Sync {
    fn fetch(&self, url: &str) -> Result<String, ServiceError>;
}

pub struct HttpDatasetSource {
    http: reqwest::blocking::Client,
}

impl HttpDatasetSource {
    pub fn new() -> Self {
        Self {
            http: reqwest::blocking::Client::new(),
        }
    }
}

impl Default for HttpDatasetSource {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetSource for HttpDatasetSource {
    fn fetch(&self, url: &str) -> Result<String, ServiceError> {
        let response = self
            .http
            .get(url)
            .send()
            .map_err(|e| ServiceError::Dataset(format!("GET {url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Dataset(format!("GET {url}: HTTP {status}")));
        }
        response
            .text()
            .map_err(|e| ServiceError::Dataset(format!("GET {url}: {e}")))
    }
}

fn read_rows<T: DeserializeOwned>(text: &str) -> Result<Vec<T>, ServiceError> {
    csv::Reader::from_reader(text.as_bytes())
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| ServiceError::Dataset(format!("malformed CSV: {e}")))
}

/// Numeric values sort numerically and before everything else; the rest sort
/// as strings.
fn natural_cmp(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(x), Ok(y)) => x.total_cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
