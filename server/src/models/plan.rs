//! The write side of an encounter: a validated, fully-defaulted description
//! of every row a create will insert, in insertion order.

use chrono::{DateTime, NaiveDate, Utc};

use super::encounter::{DiagnosisInput, MedicationEntry, NewEncounter};
use super::sql_types::{
    DiagnosisStatus, DiagnosisType, EncounterStatus, PrescriptionStatus, Route, StoredJson,
    VisitType,
};
use crate::error::ClinicalError;
use crate::validation::{
    Validator, MAX_ASSESSMENT_LENGTH, MAX_CHIEF_COMPLAINT_LENGTH, MAX_NAME_LENGTH, MAX_NOTE_LENGTH,
    MAX_PRESCRIPTIONS_PER_ENCOUNTER, MAX_REFILLS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct EncounterDraft {
    pub patient_id: i64,
    pub treating_clinician_id: i64,
    pub visit_type: VisitType,
    pub encounter_date: DateTime<Utc>,
    pub chief_complaint: String,
    pub subjective_assessment: Option<String>,
    pub objective_findings: Option<String>,
    pub clinical_assessment: String,
    pub treatment_plan: Option<String>,
    pub vital_signs: Option<StoredJson>,
    pub followup_instructions: Option<String>,
    pub next_visit_date: Option<NaiveDate>,
    pub status: EncounterStatus,
    pub duration_minutes: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosisLine {
    pub name: String,
    pub code: Option<String>,
    pub diagnosis_type: DiagnosisType,
    pub diagnosed_date: NaiveDate,
    pub resolved_date: Option<NaiveDate>,
    pub status: DiagnosisStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrescriptionLine {
    pub medication_name: String,
    pub dosage_instructions: String,
    pub dosage_value: Option<String>,
    pub frequency: Option<String>,
    pub duration: Option<String>,
    pub special_instructions: Option<String>,
    pub route: Route,
    pub quantity: Option<i32>,
    pub refills: i32,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub status: PrescriptionStatus,
    pub prescribed_by: i64,
}

/// Every row of one encounter create.
#[derive(Debug, Clone, PartialEq)]
pub struct EncounterPlan {
    pub encounter: EncounterDraft,
    pub diagnoses: Vec<DiagnosisLine>,
    pub prescriptions: Vec<PrescriptionLine>,
}

impl EncounterPlan {
    /// Validates the request and fills in defaults. `acting_user` becomes the
    /// treating clinician unless the request names one.
    pub fn build(
        input: NewEncounter,
        acting_user: i64,
        now: DateTime<Utc>,
    ) -> Result<Self, ClinicalError> {
        let mut v = Validator::new();

        if input.patient_record_id.is_none() {
            v.reject("patient_record_id", "is required");
        }
        v.required_text("chief_complaint", input.chief_complaint.as_deref(), MAX_CHIEF_COMPLAINT_LENGTH);
        v.required_text("clinical_assessment", input.clinical_assessment.as_deref(), MAX_ASSESSMENT_LENGTH);
        v.optional_text("subjective_assessment", input.subjective_assessment.as_deref(), MAX_NOTE_LENGTH);
        v.optional_text("objective_findings", input.objective_findings.as_deref(), MAX_NOTE_LENGTH);
        v.optional_text("treatment_plan", input.treatment_plan.as_deref(), MAX_NOTE_LENGTH);
        v.optional_text("followup_instructions", input.followup_instructions.as_deref(), MAX_NOTE_LENGTH);
        v.in_range("duration", input.duration, 0, 24 * 60);
        if input.prescribed_medications.len() > MAX_PRESCRIPTIONS_PER_ENCOUNTER {
            v.reject(
                "prescribedMedications",
                format!("at most {} medications per encounter", MAX_PRESCRIPTIONS_PER_ENCOUNTER),
            );
        }

        let encounter_date = input.encounter_date.unwrap_or(now);
        let visit_day = encounter_date.date_naive();
        v.date_order("next_visit_date", Some(visit_day), input.next_visit_date);

        let treating_clinician_id = input.treating_clinician_id.unwrap_or(acting_user);

        let diagnoses: Vec<DiagnosisLine> = input
            .diagnosis
            .into_iter()
            .enumerate()
            .map(|(i, entry)| diagnosis_line(&mut v, i, entry.into(), visit_day))
            .collect();

        let prescriptions: Vec<PrescriptionLine> = input
            .prescribed_medications
            .into_iter()
            .enumerate()
            .map(|(i, entry)| prescription_line(&mut v, i, entry, visit_day, treating_clinician_id))
            .collect();

        v.finish()?;

        Ok(Self {
            encounter: EncounterDraft {
                patient_id: input.patient_record_id.unwrap_or_default(),
                treating_clinician_id,
                visit_type: input.visit_type.unwrap_or(VisitType::Routine),
                encounter_date,
                chief_complaint: trimmed(input.chief_complaint).unwrap_or_default(),
                subjective_assessment: trimmed(input.subjective_assessment),
                objective_findings: trimmed(input.objective_findings),
                clinical_assessment: trimmed(input.clinical_assessment).unwrap_or_default(),
                treatment_plan: trimmed(input.treatment_plan),
                vital_signs: input.vital_signs.filter(|signs| !signs.is_null()).map(StoredJson),
                followup_instructions: trimmed(input.followup_instructions),
                next_visit_date: input.next_visit_date,
                status: input.status.unwrap_or(EncounterStatus::Completed),
                duration_minutes: input.duration,
            },
            diagnoses,
            prescriptions,
        })
    }
}

/// Checks and defaults one diagnosis added to an existing encounter.
pub fn single_diagnosis(input: DiagnosisInput, visit_day: NaiveDate) -> Result<DiagnosisLine, ClinicalError> {
    let mut v = Validator::new();
    let line = diagnosis_line_named(&mut v, "", input, visit_day);
    v.finish()?;
    Ok(line)
}

/// Checks and defaults one prescription added to an existing encounter.
pub fn single_prescription(
    entry: MedicationEntry,
    visit_day: NaiveDate,
    treating_clinician_id: i64,
) -> Result<PrescriptionLine, ClinicalError> {
    let mut v = Validator::new();
    let line = prescription_line_named(&mut v, "", entry, visit_day, treating_clinician_id);
    v.finish()?;
    Ok(line)
}

fn diagnosis_line(v: &mut Validator, index: usize, input: DiagnosisInput, visit_day: NaiveDate) -> DiagnosisLine {
    diagnosis_line_named(v, &format!("diagnosis[{}].", index), input, visit_day)
}

fn diagnosis_line_named(
    v: &mut Validator,
    prefix: &str,
    input: DiagnosisInput,
    visit_day: NaiveDate,
) -> DiagnosisLine {
    let diagnosed_date = input.diagnosed_date.unwrap_or(visit_day);
    v.required_text(&format!("{}name", prefix), Some(input.name.as_str()), 255);
    v.date_order(&format!("{}resolved_date", prefix), Some(diagnosed_date), input.resolved_date);

    DiagnosisLine {
        name: input.name.trim().to_string(),
        code: trimmed(input.code),
        diagnosis_type: input.diagnosis_type.unwrap_or(DiagnosisType::Primary),
        diagnosed_date,
        resolved_date: input.resolved_date,
        status: input.status.unwrap_or(DiagnosisStatus::Active),
        notes: trimmed(input.notes),
    }
}

fn prescription_line(
    v: &mut Validator,
    index: usize,
    entry: MedicationEntry,
    visit_day: NaiveDate,
    treating_clinician_id: i64,
) -> PrescriptionLine {
    prescription_line_named(
        v,
        &format!("prescribedMedications[{}].", index),
        entry,
        visit_day,
        treating_clinician_id,
    )
}

fn prescription_line_named(
    v: &mut Validator,
    prefix: &str,
    entry: MedicationEntry,
    visit_day: NaiveDate,
    treating_clinician_id: i64,
) -> PrescriptionLine {
    let field = |name: &str| format!("{}{}", prefix, name);
    v.required_text(&field("name"), Some(entry.name.as_str()), MAX_NAME_LENGTH);
    v.in_range(&field("refills"), entry.refills, 0, MAX_REFILLS);
    v.in_range(&field("quantity"), entry.quantity, 0, i32::MAX);

    let start_date = entry.start_date.unwrap_or(visit_day);
    v.date_order(&field("end_date"), Some(start_date), entry.end_date);

    let dosage_value = trimmed(entry.dosage);
    let frequency = trimmed(entry.frequency);
    let duration = trimmed(entry.duration);
    let dosage_instructions = match trimmed(entry.dosage_instructions) {
        Some(explicit) => explicit,
        None => {
            let synthesized = synthesize_instructions(
                dosage_value.as_deref(),
                frequency.as_deref(),
                duration.as_deref(),
            );
            if synthesized.is_empty() {
                v.reject(
                    field("dosage_instructions"),
                    "is required when dosage, frequency and duration are all missing",
                );
            }
            synthesized
        }
    };

    PrescriptionLine {
        medication_name: entry.name.trim().to_string(),
        dosage_instructions,
        dosage_value,
        frequency,
        duration,
        special_instructions: trimmed(entry.special_instructions),
        route: entry.route.unwrap_or(Route::Oral),
        quantity: entry.quantity,
        refills: entry.refills.unwrap_or(0),
        start_date,
        end_date: entry.end_date,
        status: entry.status.unwrap_or(PrescriptionStatus::Active),
        prescribed_by: entry.prescribed_by.unwrap_or(treating_clinician_id),
    }
}

/// `"<value> <frequency> for <duration>"`, omitting whatever is missing.
pub fn synthesize_instructions(value: Option<&str>, frequency: Option<&str>, duration: Option<&str>) -> String {
    let mut text = [value, frequency]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    if let Some(duration) = duration {
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str("for ");
        text.push_str(duration);
    }
    text
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
