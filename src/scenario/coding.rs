use std::{collections::HashMap, sync::Arc};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    error::ServiceError,
    scenario::{
        DatasetSource, Instance, QuestionDetails, Reference, Scenario, Split, TestCase,
        natural_cmp, read_rows,
    },
};

const DATASET_BASE: &str = "https://huggingface.co/datasets/Kazchoko/my_dataset/resolve/main";
const STUDENT_STYLE_DATA: &str = "Scenario1_2_data.csv";
const TOPIC_PERFORMANCE_DATA: &str = "student_performace_by_topic.csv";
const CODE_EFFICIENCY_DATA: &str = "Scenario4_full_data.csv";
const SAMPLE_STUDENT_DATA: &str = "sample_fifty_student_full.csv";
const TEST_CASES_BY_QUESTION: &str = "test_cases_by_qid.json";

/// Number of consecutive attempts taken from each student.
const ATTEMPTS_PER_STUDENT: usize = 4;

const STUDENT_STYLE_INSTRUCTIONS: &str = "Provide ONLY your C++ implementation that will replace \
    the {{ STUDENT_ANSWER }} block in the template.  \
    \u{2013} Do NOT reproduce any part of the template  \
    \u{2013} Do NOT emit `int main()` (it\u{2019}s already declared)  \
    \u{2013} Ensure your code mirrors the style of the previous examples and includes any \
    necessary class definitions  \
    IMPORTANT: your entire response must be exactly one Markdown C++ code\u{2010}block:\n\
    1. First line: ```cpp\n\
    2. Last line: ```\n\
    No extra whitespace or text before/after.\n";

const EFFICIENCY_INSTRUCTIONS: &str = "Provide ONLY your C++ implementation that will replace \
    the {{ STUDENT_ANSWER }} block in the template.  \
    \u{2013} Do NOT reproduce any part of the template  \
    \u{2013} Do NOT emit `int main()` (it\u{2019}s already declared)  \
    \u{2013} Ensure your code is correct, handles all edge cases, and includes any needed \
    class definitions  \
    \u{2013} Match the student\u{2019}s usual efficiency style.\n\n\
    IMPORTANT: your entire response must be exactly one Markdown C++ code\u{2011}block:\n\
    1. First line: ```cpp\n\
    2. Last line: ```\n\
    No extra whitespace or text before/after.\n";

fn dataset_url(file: &str) -> String {
    format!("{DATASET_BASE}/{file}")
}

/// One submission of a student to a programming question.
#[derive(Debug, Clone, Deserialize)]
struct Attempt {
    student_id: String,
    timestamp: String,
    #[serde(default)]
    question_unittest_id: Option<String>,
    question_name: String,
    question_text: String,
    question_template: String,
    response: String,
    #[serde(default)]
    question_unittests: Option<String>,
    #[serde(default)]
    pass: Option<String>,
    week: String,
    topic: String,
}

impl Attempt {
    fn question_id(&self) -> &str {
        self.question_unittest_id.as_deref().unwrap_or_default()
    }

    fn instance_id(&self) -> String {
        format!("{}_{}", self.student_id, self.question_id())
    }

    fn example(&self, n: usize) -> String {
        format!(
            "Example {n}:\nQuestion: {} \u{2014} {}\nTemplate:\n{}\nYour Code:\n{}\n\n",
            self.question_name, self.question_text, self.question_template, self.response
        )
    }

    fn details(
        &self,
        test_cases: Vec<TestCase>,
        correctness: Option<Vec<u8>>,
    ) -> QuestionDetails {
        QuestionDetails {
            question_template: self.question_template.clone(),
            test_cases,
            question_id: self.question_unittest_id.clone(),
            question_name: self.question_name.clone(),
            student_id: Some(self.student_id.clone()),
            student_correctness_pattern: correctness,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TopicPerformance {
    student_id: String,
    topic: String,
    pass_rate: f64,
    perfect: f64,
}

/// Attempts grouped per student in student order, each group in submission order.
fn attempts_by_student(rows: Vec<Attempt>) -> Vec<(String, Vec<Attempt>)> {
    let mut groups: HashMap<String, Vec<Attempt>> = HashMap::new();
    for row in rows {
        groups.entry(row.student_id.clone()).or_default().push(row);
    }

    let mut groups: Vec<_> = groups.into_iter().collect();
    groups.sort_by(|a, b| natural_cmp(&a.0, &b.0));
    for (_, attempts) in &mut groups {
        attempts.sort_by(|a, b| natural_cmp(&a.timestamp, &b.timestamp));
    }
    groups
}

/// Parses `Unittest <n>: Input: ... STD input: ... Output: ...` blocks.
/// Returns `None` if any block lacks one of the three markers.
fn parse_unittests(listing: &str) -> Option<Vec<TestCase>> {
    listing
        .split("Unittest")
        .skip(1)
        .map(|chunk| {
            let body = &chunk[chunk.find(':').map_or(0, |i| i + 1)..];
            let input = body.find("Input:")?;
            let std_in = body.find("STD input:")?;
            let output = body.find("Output:")?;
            Some(TestCase {
                unittest: None,
                input: between(body, input + "Input:".len(), std_in),
                std_in: Some(between(body, std_in + "STD input:".len(), output)),
                output: body[output + "Output:".len()..].trim().to_string(),
            })
        })
        .collect()
}

fn between(body: &str, start: usize, end: usize) -> String {
    body.get(start..end).unwrap_or_default().trim().to_string()
}

/// Keeps the first `limit` cases; `None` when fewer are available.
/// Without a limit every case is kept.
fn limit_test_cases(mut cases: Vec<TestCase>, limit: Option<usize>) -> Option<Vec<TestCase>> {
    match limit {
        Some(limit) if cases.len() < limit => None,
        Some(limit) => {
            cases.truncate(limit);
            Some(cases)
        }
        None => Some(cases),
    }
}

/// Reads a pass pattern such as `1101` into per-test flags.
fn correctness_pattern(pass: &str) -> Result<Vec<u8>, ServiceError> {
    let digits = pass.trim();
    let digits = digits.strip_suffix(".0").unwrap_or(digits);
    digits
        .chars()
        .map(|c| {
            c.to_digit(10).map(|d| d as u8).ok_or_else(|| {
                ServiceError::Dataset(format!("invalid pass pattern {pass:?}"))
            })
        })
        .collect()
}

/// The test cases rendered the way the prompt shows them to the model, as a
/// Python list of dicts.
fn unit_test_listing(cases: &[TestCase]) -> String {
    let entries: Vec<String> = cases
        .iter()
        .map(|case| {
            format!(
                "{{'input': {}, 'std_in': {}, 'output': {}}}",
                python_str(&case.input),
                python_str(case.std_in.as_deref().unwrap_or_default()),
                python_str(&case.output)
            )
        })
        .collect();
    format!("[{}]", entries.join(", "))
}

fn python_str(text: &str) -> String {
    let quote = if text.contains('\'') && !text.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(text.len() + 2);
    out.push(quote);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Loads `test_cases_by_qid.json`; an unavailable or unreadable file yields no test cases.
fn load_test_cases(source: &dyn DatasetSource) -> HashMap<String, Vec<TestCase>> {
    let loaded = source
        .fetch(&dataset_url(TEST_CASES_BY_QUESTION))
        .and_then(|text| Ok(serde_json::from_str::<HashMap<String, Vec<TestCase>>>(&text)?));
    match loaded {
        Ok(cases) => cases,
        Err(err) => {
            warn!(%err, "failed to load test cases, continuing without them");
            HashMap::new()
        }
    }
}

/// Each target attempt with the other attempts of the same student as examples.
fn rotations(attempts: &[Attempt]) -> impl Iterator<Item = (&Attempt, Vec<&Attempt>)> {
    (0..attempts.len()).map(move |target| {
        let examples = attempts
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != target)
            .map(|(_, attempt)| attempt)
            .collect();
        (&attempts[target], examples)
    })
}

/// Asks the model to imitate a student's C++ style on a new question, given
/// the student's per-topic performance and three of their other submissions.
pub struct StudentStyleScenario {
    source: Arc<dyn DatasetSource>,
    num_testcases: Option<usize>,
}

impl StudentStyleScenario {
    pub fn new(source: Arc<dyn DatasetSource>) -> Self {
        Self {
            source,
            num_testcases: Some(1),
        }
    }

    /// Questions with fewer parsed test cases than `num_testcases` are skipped.
    /// `None` keeps every question and every test case.
    pub fn with_num_testcases(mut self, num_testcases: Option<usize>) -> Self {
        self.num_testcases = num_testcases;
        self
    }

    fn student_profile(student_id: &str, performance: &[TopicPerformance]) -> String {
        let mut profile =
            format!("Student {student_id} has the following performance across topics:\n");
        for row in performance.iter().filter(|row| row.student_id == student_id) {
            profile += &format!(
                "- For topic '{}', the unit test pass rate is {:.2}, \
                 and the rate of passing all tests is {:.2}.\n",
                row.topic, row.pass_rate, row.perfect
            );
        }
        profile
    }
}

impl Scenario for StudentStyleScenario {
    fn name(&self) -> &'static str {
        "codeinsights_student_coding"
    }

    fn description(&self) -> &'static str {
        "Mimic student C++ style on foundational questions"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["codeinsights", "c++", "student_coding"]
    }

    fn get_instances(&self) -> Result<Vec<Instance>, ServiceError> {
        let attempts: Vec<Attempt> =
            read_rows(&self.source.fetch(&dataset_url(STUDENT_STYLE_DATA))?)?;
        let performance: Vec<TopicPerformance> =
            read_rows(&self.source.fetch(&dataset_url(TOPIC_PERFORMANCE_DATA))?)?;

        let mut instances = Vec::new();
        for (student_id, attempts) in attempts_by_student(attempts) {
            if attempts.len() < ATTEMPTS_PER_STUDENT {
                continue;
            }
            let profile = Self::student_profile(&student_id, &performance);

            for (target, examples) in rotations(&attempts[..ATTEMPTS_PER_STUDENT]) {
                let Some(test_cases) = target
                    .question_unittests
                    .as_deref()
                    .and_then(parse_unittests)
                    .and_then(|cases| limit_test_cases(cases, self.num_testcases))
                else {
                    continue;
                };
                let correctness = correctness_pattern(target.pass.as_deref().unwrap_or("0"))?;

                let mut prompt = format!(
                    "=== Student Profile ===\n{profile}\nWeek: {}\nTopic: {}\n\n",
                    target.week, target.topic
                );
                for (n, example) in examples.iter().enumerate() {
                    prompt += &example.example(n + 1);
                }
                prompt += &format!(
                    "Now, using that same student style, attempt this:\n\
                     Question: {} \u{2014} {}\n\
                     Unit Test Input: {}\n\n\
                     Template:\n{}\n\n",
                    target.question_name,
                    target.question_text,
                    unit_test_listing(&test_cases),
                    target.question_template
                );
                prompt += STUDENT_STYLE_INSTRUCTIONS;

                instances.push(Instance {
                    id: Some(target.instance_id()),
                    input: prompt,
                    references: vec![Reference::correct(&target.response)],
                    extra_data: Some(target.details(test_cases, Some(correctness))),
                    split: Split::Valid,
                });
            }
        }
        Ok(instances)
    }
}

/// Same few-shot setup as [`StudentStyleScenario`] without the student
/// profile, graded on how closely runtime efficiency matches the student's.
pub struct CodeEfficiencyScenario {
    source: Arc<dyn DatasetSource>,
    num_testcases: Option<usize>,
}

impl CodeEfficiencyScenario {
    pub fn new(source: Arc<dyn DatasetSource>) -> Self {
        Self {
            source,
            num_testcases: Some(1),
        }
    }

    pub fn with_num_testcases(mut self, num_testcases: Option<usize>) -> Self {
        self.num_testcases = num_testcases;
        self
    }
}

impl Scenario for CodeEfficiencyScenario {
    fn name(&self) -> &'static str {
        "codeinsights_code_efficiency"
    }

    fn description(&self) -> &'static str {
        "Evaluate runtime efficiency alignment between LLM-generated code and student code"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["codeinsights", "c++", "code_efficiency"]
    }

    fn get_instances(&self) -> Result<Vec<Instance>, ServiceError> {
        let attempts: Vec<Attempt> =
            read_rows(&self.source.fetch(&dataset_url(CODE_EFFICIENCY_DATA))?)?;

        let mut instances = Vec::new();
        let mut skipped_no_tests = 0;
        let mut skipped_insufficient_data = 0;

        for (student_id, attempts) in attempts_by_student(attempts) {
            if attempts.len() < ATTEMPTS_PER_STUDENT {
                skipped_insufficient_data += 1;
                continue;
            }

            for (target, examples) in rotations(&attempts[..ATTEMPTS_PER_STUDENT]) {
                let Some(parsed) = target.question_unittests.as_deref().and_then(parse_unittests)
                else {
                    skipped_no_tests += 1;
                    debug!(%student_id, question = target.question_id(), "no parsable test cases");
                    continue;
                };
                let Some(test_cases) = limit_test_cases(parsed, self.num_testcases) else {
                    continue;
                };
                let correctness = match target.pass.as_deref() {
                    Some(pass) => correctness_pattern(pass)?,
                    None => Vec::new(),
                };
                debug!(
                    %student_id,
                    question = target.question_id(),
                    test_cases = test_cases.len(),
                    "accepted instance"
                );

                let mut prompt = format!("Week: {}\nTopic: {}\n\n", target.week, target.topic);
                for (n, example) in examples.iter().enumerate() {
                    prompt += &example.example(n + 1);
                }
                prompt += &format!(
                    "Now, using that same student's coding style, attempt this:\n\
                     Question: {} \u{2014} {}\n\n\
                     Template:\n{}\n\n",
                    target.question_name, target.question_text, target.question_template
                );
                prompt += EFFICIENCY_INSTRUCTIONS;

                instances.push(Instance {
                    id: Some(target.instance_id()),
                    input: prompt,
                    references: vec![Reference::correct(&target.response)],
                    extra_data: Some(target.details(test_cases, Some(correctness))),
                    split: Split::Valid,
                });
            }
        }

        info!(
            instances = instances.len(),
            skipped_insufficient_data, skipped_no_tests, "built code efficiency instances"
        );
        Ok(instances)
    }
}

/// Three earlier submissions of a student as examples, the fourth as target.
pub struct StudentCodingScenario {
    source: Arc<dyn DatasetSource>,
}

impl StudentCodingScenario {
    pub fn new(source: Arc<dyn DatasetSource>) -> Self {
        Self { source }
    }
}

impl Scenario for StudentCodingScenario {
    fn name(&self) -> &'static str {
        "student_coding"
    }

    fn description(&self) -> &'static str {
        "Mimic student C++ style on foundational questions"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["coding", "c++", "student"]
    }

    fn get_instances(&self) -> Result<Vec<Instance>, ServiceError> {
        let attempts: Vec<Attempt> =
            read_rows(&self.source.fetch(&dataset_url(SAMPLE_STUDENT_DATA))?)?;
        let test_cases = load_test_cases(self.source.as_ref());

        let mut instances = Vec::new();
        for (_, attempts) in attempts_by_student(attempts) {
            let [first, second, third, target, ..] = attempts.as_slice() else {
                continue;
            };

            let pass = target.pass.as_deref().ok_or_else(|| {
                let id = target.instance_id();
                ServiceError::Dataset(format!("attempt {id} has no pass pattern"))
            })?;
            let correctness = correctness_pattern(pass)?;
            let question_test_cases = test_cases
                .get(target.question_id())
                .cloned()
                .unwrap_or_default();

            let mut prompt = format!("Week: {}\nTopic: {}\n\n", target.week, target.topic);
            for (n, example) in [first, second, third].into_iter().enumerate() {
                prompt += &example.example(n + 1);
            }
            prompt += &format!(
                "Now, using that same student style, attempt this:\n\
                 Question: {} \u{2014} {}\n\
                 Template:\n{}\n\n\
                 Provide ONLY your C++ implementation following the given template, \
                 writing code just as you would in class\u{2014}indentation, naming, and all.",
                target.question_name, target.question_text, target.question_template
            );

            instances.push(Instance {
                id: Some(target.instance_id()),
                input: prompt,
                references: vec![Reference::correct(&target.response)],
                extra_data: Some(target.details(question_test_cases, Some(correctness))),
                split: Split::Valid,
            });
        }
        Ok(instances)
    }
}

/// One instance per question asking for a correct solution. There is no
/// reference answer; grading runs the question's unit tests.
pub struct CorrectCodeScenario {
    source: Arc<dyn DatasetSource>,
}

impl CorrectCodeScenario {
    pub fn new(source: Arc<dyn DatasetSource>) -> Self {
        Self { source }
    }
}

impl Scenario for CorrectCodeScenario {
    fn name(&self) -> &'static str {
        "correct_code"
    }

    fn description(&self) -> &'static str {
        "Generate correct response code for C++ programming questions"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["coding", "c++", "student"]
    }

    fn get_instances(&self) -> Result<Vec<Instance>, ServiceError> {
        let attempts: Vec<Attempt> =
            read_rows(&self.source.fetch(&dataset_url(SAMPLE_STUDENT_DATA))?)?;
        let test_cases = load_test_cases(self.source.as_ref());

        // First attempt seen for each question.
        let mut questions: HashMap<String, Attempt> = HashMap::new();
        for attempt in attempts {
            if let Some(question_id) = attempt.question_unittest_id.clone() {
                questions.entry(question_id).or_insert(attempt);
            }
        }
        let mut questions: Vec<_> = questions.into_iter().collect();
        questions.sort_by(|a, b| natural_cmp(&a.0, &b.0));

        Ok(questions
            .into_iter()
            .map(|(question_id, target)| {
                let input = format!(
                    "Question: {} \u{2014} {}\n\n\
                     Template:\n{}\n\n\
                     Provide ONLY your C++ implementation following the given template. \
                     Ensure your code is correct, efficient, and handles all edge cases properly.",
                    target.question_name, target.question_text, target.question_template
                );
                Instance {
                    id: Some(question_id.clone()),
                    input,
                    references: Vec::new(),
                    extra_data: Some(QuestionDetails {
                        question_template: target.question_template,
                        test_cases: test_cases.get(&question_id).cloned().unwrap_or_default(),
                        question_id: Some(question_id),
                        question_name: target.question_name,
                        student_id: None,
                        student_correctness_pattern: None,
                    }),
                    split: Split::Valid,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const UNITTESTS: &str = "Unittest 0: Input: add(1,2) STD input: Output: 3 \
                             Unittest 1: Input: add(2,2) STD input: 7 Output: 4";

    const COLUMNS: [&str; 11] = [
        "student_id",
        "timestamp",
        "question_unittest_id",
        "question_name",
        "question_text",
        "question_template",
        "response",
        "question_unittests",
        "pass",
        "week",
        "topic",
    ];

    #[derive(Default)]
    struct Fixtures(HashMap<String, String>);

    impl Fixtures {
        fn with(mut self, file: &str, text: String) -> Self {
            self.0.insert(dataset_url(file), text);
            self
        }
    }

    impl DatasetSource for Fixtures {
        fn fetch(&self, url: &str) -> Result<String, ServiceError> {
            self.0
                .get(url)
                .cloned()
                .ok_or_else(|| ServiceError::Dataset(format!("GET {url}: HTTP 404 Not Found")))
        }
    }

    fn attempt(student: &str, timestamp: &str, question: &str, pass: &str) -> Vec<String> {
        vec![
            student.to_string(),
            timestamp.to_string(),
            question.to_string(),
            format!("Q{question}"),
            format!("text {question}"),
            format!("tmpl {question}"),
            format!("code {question}"),
            UNITTESTS.to_string(),
            pass.to_string(),
            "3".to_string(),
            "Pointers".to_string(),
        ]
    }

    fn csv_text(header: &[&str], rows: &[Vec<String>]) -> String {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(header).unwrap();
        for row in rows {
            writer.write_record(row).unwrap();
        }
        String::from_utf8(writer.into_inner().unwrap()).unwrap()
    }

    fn attempts_csv(rows: &[Vec<String>]) -> String {
        csv_text(&COLUMNS, rows)
    }

    // Student 1 has too few attempts; student 2's rows are out of order.
    fn two_students() -> String {
        attempts_csv(&[
            attempt("2", "40", "104", "10"),
            attempt("1", "1", "900", "1"),
            attempt("2", "10", "101", "1101"),
            attempt("1", "2", "901", "1"),
            attempt("2", "30", "103", "11"),
            attempt("2", "50", "105", "1"),
            attempt("2", "20", "102", "0111"),
            attempt("1", "3", "902", "1"),
        ])
    }

    fn performance_csv() -> String {
        csv_text(
            &["student_id", "topic", "pass_rate", "perfect"],
            &[
                vec!["2".into(), "Pointers".into(), "0.5".into(), "0.25".into()],
                vec!["1".into(), "Loops".into(), "1".into(), "1".into()],
            ],
        )
    }

    fn style_scenario(attempts: String) -> StudentStyleScenario {
        let fixtures = Fixtures::default()
            .with(STUDENT_STYLE_DATA, attempts)
            .with(TOPIC_PERFORMANCE_DATA, performance_csv());
        StudentStyleScenario::new(Arc::new(fixtures))
    }

    #[test]
    fn parses_unittest_listing() {
        let cases = parse_unittests(UNITTESTS).unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].input, "add(1,2)");
        assert_eq!(cases[0].std_in.as_deref(), Some(""));
        assert_eq!(cases[0].output, "3");
        assert_eq!(cases[1].std_in.as_deref(), Some("7"));
        assert_eq!(cases[1].output, "4");

        assert!(parse_unittests("Unittest 0: Input: x Output: y").is_none());
        assert_eq!(parse_unittests("no tests here"), Some(Vec::new()));
    }

    #[test]
    fn pass_patterns_become_flags() {
        assert_eq!(correctness_pattern("1101").unwrap(), vec![1, 1, 0, 1]);
        assert_eq!(correctness_pattern("11.0").unwrap(), vec![1, 1]);
        assert!(correctness_pattern("pass").is_err());
    }

    #[test]
    fn listing_uses_python_literals() {
        let cases = vec![TestCase {
            unittest: None,
            input: "say('hi')".into(),
            std_in: Some(String::new()),
            output: "a\nb".into(),
        }];
        assert_eq!(
            unit_test_listing(&cases),
            r#"[{'input': "say('hi')", 'std_in': '', 'output': 'a\nb'}]"#
        );
    }

    #[test]
    fn student_style_rotates_first_four_attempts() {
        let instances = style_scenario(two_students()).get_instances().unwrap();

        let ids: Vec<_> = instances.iter().map(|i| i.id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["2_101", "2_102", "2_103", "2_104"]);

        let first = &instances[0];
        assert_eq!(first.split, Split::Valid);
        assert_eq!(first.references, vec![Reference::correct("code 101")]);
        assert!(first.input.starts_with(
            "=== Student Profile ===\n\
             Student 2 has the following performance across topics:\n\
             - For topic 'Pointers', the unit test pass rate is 0.50, \
             and the rate of passing all tests is 0.25.\n\n\
             Week: 3\nTopic: Pointers\n\n\
             Example 1:\nQuestion: Q102 \u{2014} text 102\n"
        ));
        assert!(first.input.contains(
            "Question: Q101 \u{2014} text 101\n\
             Unit Test Input: [{'input': 'add(1,2)', 'std_in': '', 'output': '3'}]\n\n\
             Template:\ntmpl 101\n\n"
        ));
        assert!(first.input.ends_with(STUDENT_STYLE_INSTRUCTIONS));
        assert!(!first.input.contains("code 105"));

        let details = first.extra_data.as_ref().unwrap();
        assert_eq!(details.test_cases.len(), 1);
        assert_eq!(details.question_id.as_deref(), Some("101"));
        assert_eq!(details.student_id.as_deref(), Some("2"));
        assert_eq!(details.student_correctness_pattern, Some(vec![1, 1, 0, 1]));
        assert_eq!(
            instances[1].extra_data.as_ref().unwrap().student_correctness_pattern,
            Some(vec![0, 1, 1, 1])
        );
    }

    #[test]
    fn questions_without_enough_test_cases_are_skipped() {
        let scenario = style_scenario(two_students()).with_num_testcases(Some(3));
        assert!(scenario.get_instances().unwrap().is_empty());

        let scenario = style_scenario(two_students()).with_num_testcases(None);
        let instances = scenario.get_instances().unwrap();
        assert_eq!(instances.len(), 4);
        assert_eq!(instances[0].extra_data.as_ref().unwrap().test_cases.len(), 2);
    }

    #[test]
    fn unparsable_unittests_skip_the_attempt() {
        let mut rows = vec![
            attempt("7", "1", "1", "1"),
            attempt("7", "2", "2", "1"),
            attempt("7", "3", "3", "1"),
            attempt("7", "4", "4", "1"),
        ];
        rows[2][7] = "Unittest 0: Input: x Output: y".to_string();

        let fixtures = Fixtures::default().with(CODE_EFFICIENCY_DATA, attempts_csv(&rows));
        let instances = CodeEfficiencyScenario::new(Arc::new(fixtures))
            .get_instances()
            .unwrap();
        let ids: Vec<_> = instances.iter().map(|i| i.id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["7_1", "7_2", "7_4"]);
    }

    #[test]
    fn code_efficiency_prompt_has_no_profile() {
        let mut rows = vec![
            attempt("2", "10", "101", "1"),
            attempt("2", "20", "102", "1"),
            attempt("2", "30", "103", "1"),
            attempt("2", "40", "104", "1"),
        ];
        rows[0][8] = String::new();

        let fixtures = Fixtures::default().with(CODE_EFFICIENCY_DATA, attempts_csv(&rows));
        let instances = CodeEfficiencyScenario::new(Arc::new(fixtures))
            .get_instances()
            .unwrap();

        let first = &instances[0];
        assert!(first.input.starts_with("Week: 3\nTopic: Pointers\n\nExample 1:\n"));
        assert!(first.input.contains(
            "Now, using that same student's coding style, attempt this:\n\
             Question: Q101 \u{2014} text 101\n\nTemplate:\ntmpl 101\n\n"
        ));
        assert!(first.input.ends_with(EFFICIENCY_INSTRUCTIONS));
        assert!(!first.input.contains("Unit Test Input"));
        assert_eq!(
            first.extra_data.as_ref().unwrap().student_correctness_pattern,
            Some(Vec::new())
        );
    }

    #[test]
    fn student_coding_targets_fourth_attempt() {
        let fixtures = Fixtures::default()
            .with(SAMPLE_STUDENT_DATA, two_students())
            .with(
                TEST_CASES_BY_QUESTION,
                json!({"104": [{"unittest": "0", "input": "f()", "output": "1"}]}).to_string(),
            );
        let instances = StudentCodingScenario::new(Arc::new(fixtures))
            .get_instances()
            .unwrap();

        assert_eq!(instances.len(), 1);
        let instance = &instances[0];
        assert_eq!(instance.id.as_deref(), Some("2_104"));
        assert!(instance.input.contains("Example 3:\nQuestion: Q103"));
        assert!(instance.input.ends_with("in class\u{2014}indentation, naming, and all."));

        let details = instance.extra_data.as_ref().unwrap();
        assert_eq!(details.test_cases[0].unittest.as_deref(), Some("0"));
        assert_eq!(details.student_correctness_pattern, Some(vec![1, 0]));
    }

    #[test]
    fn missing_test_case_file_is_tolerated() {
        let fixtures = Fixtures::default().with(SAMPLE_STUDENT_DATA, two_students());
        let instances = StudentCodingScenario::new(Arc::new(fixtures))
            .get_instances()
            .unwrap();
        assert!(instances[0].extra_data.as_ref().unwrap().test_cases.is_empty());
    }

    #[test]
    fn correct_code_has_one_instance_per_question() {
        let mut rows = vec![
            attempt("1", "1", "20", "1"),
            attempt("2", "1", "3", "1"),
            attempt("3", "1", "20", "1"),
            attempt("3", "2", "", "1"),
        ];
        rows[2][6] = "later answer".to_string();

        let test_cases = json!({"20": [{"input": "g()", "output": "2"}]});
        let fixtures = Fixtures::default()
            .with(SAMPLE_STUDENT_DATA, attempts_csv(&rows))
            .with(TEST_CASES_BY_QUESTION, test_cases.to_string());
        let instances = CorrectCodeScenario::new(Arc::new(fixtures))
            .get_instances()
            .unwrap();

        let ids: Vec<_> = instances.iter().map(|i| i.id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["3", "20"]);
        let question = &instances[1];
        assert!(question.references.is_empty());
        assert_eq!(
            question.input,
            "Question: Q20 \u{2014} text 20\n\nTemplate:\ntmpl 20\n\n\
             Provide ONLY your C++ implementation following the given template. \
             Ensure your code is correct, efficient, and handles all edge cases properly."
        );
        let details = question.extra_data.as_ref().unwrap();
        assert_eq!(details.test_cases.len(), 1);
        assert_eq!(details.student_id, None);
    }

    #[test]
    fn unreachable_dataset_is_an_error() {
        let err = StudentCodingScenario::new(Arc::new(Fixtures::default()))
            .get_instances()
            .unwrap_err();
        assert!(matches!(err, ServiceError::Dataset(_)));
    }
}
