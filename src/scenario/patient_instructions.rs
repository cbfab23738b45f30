use std::path::PathBuf;

use tracing::info;

use crate::{
    error::ServiceError,
    scenario::{Instance, Reference, Scenario, Split},
};

/// After-visit instructions for outpatient surgeries and procedures, read from
/// a local CSV export. Each row that passed quality control becomes one
/// zero-shot test instance: the case notes are the input and the discharge
/// instructions written for the patient are the reference.
pub struct PatientInstructionsScenario {
    data_path: PathBuf,
}

impl PatientInstructionsScenario {
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
        }
    }
}

impl Scenario for PatientInstructionsScenario {
    fn name(&self) -> &'static str {
        "starr_patient_instructions"
    }

    fn description(&self) -> &'static str {
        "PatientInstruct is a benchmark designed to evaluate models on generating personalized \
         post-procedure instructions for patients. It includes real-world patient History & \
         Physical Note (H&P) and operative report, from which models must produce clear, \
         actionable instructions appropriate for patients recovering from medical interventions."
    }

    fn tags(&self) -> &'static [&'static str] {
        &["patient_communication", "healthcare", "instruction_generation", "surgery"]
    }

    fn get_instances(&self) -> Result<Vec<Instance>, ServiceError> {
        if !self.data_path.is_file() {
            return Err(ServiceError::Dataset(format!(
                "required data file not found: '{}'",
                self.data_path.display()
            )));
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.data_path)
            .map_err(|e| ServiceError::Dataset(e.to_string()))?;
        let headers = reader
            .headers()
            .map_err(|e| ServiceError::Dataset(e.to_string()))?
            .clone();

        let mut instances = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| ServiceError::Dataset(e.to_string()))?;
            let field = |name: &str| {
                headers
                    .iter()
                    .position(|header| header == name)
                    .and_then(|i| record.get(i))
                    .unwrap_or_default()
                    .trim()
            };

            if !field("QC").eq_ignore_ascii_case("TRUE") {
                continue;
            }
            let diagnosis = field("Diagnosis");
            let procedure = field("ActualProcedure");
            let history_physical = field("HistoryPhysicalNoteText");
            let operative_note = field("OperativeNoteText");
            let instructions = field("DischargeInstructionNoteText");
            if [diagnosis, procedure, history_physical, operative_note, instructions]
                .iter()
                .any(|value| value.is_empty())
            {
                continue;
            }

            instances.push(Instance {
                id: None,
                input: format!(
                    "Diagnosis: {diagnosis}\n\
                     Procedure: {procedure}\n\
                     History & Physical: {history_physical}\n\
                     Operative Report: {operative_note}\n\n"
                ),
                references: vec![Reference::correct(instructions)],
                extra_data: None,
                split: Split::Test,
            });
        }

        info!(
            path = %self.data_path.display(),
            instances = instances.len(),
            "loaded patient cases"
        );
        Ok(instances)
    }
}
