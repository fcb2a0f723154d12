//! The two-step "submit an event" workflow.
//!
//! [`SubmissionForm`] is the synchronous state machine: it owns the draft,
//! the current validation errors and the step tag, and every transition is
//! a plain method. [`SubmissionController`] wraps it for shared use from
//! request handlers and owns the only asynchronous edge, the hand-off to an
//! [`EventSubmitter`].

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum FormStep {
    #[default]
    Basics,
    Details,
}

impl From<FormStep> for u8 {
    fn from(step: FormStep) -> Self {
        match step {
            FormStep::Basics => 1,
            FormStep::Details => 2,
        }
    }
}

impl TryFrom<u8> for FormStep {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(FormStep::Basics),
            2 => Ok(FormStep::Details),
            other => Err(format!("no form step {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubmissionDraft {
    pub title: String,
    pub description: String,
    pub start_date: Option<NaiveDate>,
    pub start_time: String,
    pub location: String,
    pub is_online: bool,
    pub online_url: String,
    pub website_url: String,
    pub college: String,
    pub selected_categories: Vec<String>,
    pub agreed_to_terms: bool,
    pub current_step: FormStep,
}

/// A partial edit. Only the fields that are `Some` are written.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DraftUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub start_time: Option<String>,
    pub location: Option<String>,
    pub is_online: Option<bool>,
    pub online_url: Option<String>,
    pub website_url: Option<String>,
    pub college: Option<String>,
    pub agreed_to_terms: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Title,
    Description,
    StartDate,
    StartTime,
    Location,
    OnlineUrl,
    Categories,
    Terms,
    Submit,
}

impl Field {
    pub fn message(self) -> &'static str {
        match self {
            Field::Title => "Title is required",
            Field::Description => "Description is required",
            Field::StartDate => "Start date is required",
            Field::StartTime => "Start time is required",
            Field::Location => "Location is required",
            Field::OnlineUrl => "Online URL is required",
            Field::Categories => "At least one category is required",
            Field::Terms => "You must agree to the terms",
            Field::Submit => "There was an error submitting your event.",
        }
    }
}

/// Field name to message. Empty means valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<Field, String>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.0.contains_key(&field)
    }

    pub fn insert(&mut self, field: Field, message: impl Into<String>) {
        self.0.insert(field, message.into());
    }

    pub fn clear(&mut self, field: Field) {
        self.0.remove(&field);
    }

    fn require(&mut self, ok: bool, field: Field) {
        if !ok {
            self.insert(field, field.message());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Basic info only: title, description, schedule, venue.
    Basics,
    Full,
}

fn filled(value: &str) -> bool {
    !value.trim().is_empty()
}

pub fn validate(draft: &SubmissionDraft, scope: Scope) -> ValidationErrors {
    let mut errors = ValidationErrors::default();
    errors.require(filled(&draft.title), Field::Title);
    errors.require(filled(&draft.description), Field::Description);
    errors.require(draft.start_date.is_some(), Field::StartDate);
    errors.require(filled(&draft.start_time), Field::StartTime);
    if draft.is_online {
        errors.require(filled(&draft.online_url), Field::OnlineUrl);
    } else {
        errors.require(filled(&draft.location), Field::Location);
    }
    if scope == Scope::Full {
        errors.require(!draft.selected_categories.is_empty(), Field::Categories);
        errors.require(draft.agreed_to_terms, Field::Terms);
    }
    errors
}

/// The validated content handed to the external submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    pub title: String,
    pub description: String,
    pub start_date: NaiveDate,
    pub start_time: String,
    pub location: Option<String>,
    pub online_url: Option<String>,
    pub website_url: Option<String>,
    pub college: Option<String>,
    pub categories: Vec<String>,
}

fn non_blank(value: &str) -> Option<String> {
    filled(value).then(|| value.trim().to_string())
}

impl SubmissionPayload {
    pub fn from_draft(draft: &SubmissionDraft) -> Result<Self, ValidationErrors> {
        let errors = validate(draft, Scope::Full);
        match draft.start_date {
            Some(start_date) if errors.is_empty() => Ok(Self {
                title: draft.title.trim().to_string(),
                description: draft.description.trim().to_string(),
                start_date,
                start_time: draft.start_time.trim().to_string(),
                location: if draft.is_online { None } else { non_blank(&draft.location) },
                online_url: if draft.is_online { non_blank(&draft.online_url) } else { None },
                website_url: non_blank(&draft.website_url),
                college: non_blank(&draft.college),
                categories: draft.selected_categories.clone(),
            }),
            _ => Err(errors),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FormState {
    Step1,
    Step2,
    Submitting,
    Submitted,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("submission rejected: {0}")]
    Rejected(String),
    #[error("submission timed out after {0:?}")]
    TimedOut(Duration),
    #[error("submission was cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("{} field(s) need attention", .0.len())]
    Invalid(ValidationErrors),
    #[error("cannot {action} while the form is {state:?}")]
    NotAllowed {
        action: &'static str,
        state: FormState,
    },
    #[error("a submission is already in flight")]
    InFlight,
    #[error(transparent)]
    Failed(#[from] SubmitError),
}

/// The external collaborator that accepts a finished submission.
#[async_trait]
pub trait EventSubmitter: Send + Sync {
    /// Returns the id under which the event was filed.
    async fn submit_event(&self, payload: SubmissionPayload) -> Result<String, SubmitError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSnapshot {
    pub state: FormState,
    pub draft: SubmissionDraft,
    pub errors: ValidationErrors,
    pub event_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SubmissionForm {
    draft: SubmissionDraft,
    errors: ValidationErrors,
    state: FormState,
    event_id: Option<String>,
}

impl Default for SubmissionForm {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionForm {
    pub fn new() -> Self {
        Self::from_draft(SubmissionDraft::default())
    }

    /// Resumes a form at the step recorded in the draft.
    pub fn from_draft(draft: SubmissionDraft) -> Self {
        let state = match draft.current_step {
            FormStep::Basics => FormState::Step1,
            FormStep::Details => FormState::Step2,
        };
        Self {
            draft,
            errors: ValidationErrors::default(),
            state,
            event_id: None,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> FormState {
        self.state
    }

    #[cfg(test)]
    pub fn draft(&self) -> &SubmissionDraft {
        &self.draft
    }

    #[cfg(test)]
    pub fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    pub fn snapshot(&self) -> FormSnapshot {
        FormSnapshot {
            state: self.state,
            draft: self.draft.clone(),
            errors: self.errors.clone(),
            event_id: self.event_id.clone(),
        }
    }

    fn ensure(&self, action: &'static str, allowed: &[FormState]) -> Result<(), FormError> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        if self.state == FormState::Submitting {
            return Err(FormError::InFlight);
        }
        Err(FormError::NotAllowed {
            action,
            state: self.state,
        })
    }

    fn ensure_editable(&self, action: &'static str) -> Result<(), FormError> {
        self.ensure(action, &[FormState::Step1, FormState::Step2])
    }

    /// Writes the supplied fields and drops the errors attached to them.
    pub fn update(&mut self, update: DraftUpdate) -> Result<(), FormError> {
        self.ensure_editable("edit")?;
        let draft = &mut self.draft;
        let errors = &mut self.errors;
        if let Some(title) = update.title {
            draft.title = title;
            errors.clear(Field::Title);
        }
        if let Some(description) = update.description {
            draft.description = description;
            errors.clear(Field::Description);
        }
        if let Some(start_date) = update.start_date {
            draft.start_date = Some(start_date);
            errors.clear(Field::StartDate);
        }
        if let Some(start_time) = update.start_time {
            draft.start_time = start_time;
            errors.clear(Field::StartTime);
        }
        if let Some(location) = update.location {
            draft.location = location;
            errors.clear(Field::Location);
        }
        if let Some(is_online) = update.is_online {
            draft.is_online = is_online;
            errors.clear(Field::Location);
            errors.clear(Field::OnlineUrl);
        }
        if let Some(online_url) = update.online_url {
            draft.online_url = online_url;
            errors.clear(Field::OnlineUrl);
        }
        if let Some(website_url) = update.website_url {
            draft.website_url = website_url;
        }
        if let Some(college) = update.college {
            draft.college = college;
        }
        if let Some(agreed) = update.agreed_to_terms {
            draft.agreed_to_terms = agreed;
            errors.clear(Field::Terms);
        }
        Ok(())
    }

    pub fn toggle_category(&mut self, category_id: &str) -> Result<(), FormError> {
        self.ensure_editable("change categories")?;
        let selected = &mut self.draft.selected_categories;
        match selected.iter().position(|id| id == category_id) {
            Some(index) => {
                selected.remove(index);
            }
            None => selected.push(category_id.to_string()),
        }
        self.errors.clear(Field::Categories);
        Ok(())
    }

    pub fn advance(&mut self) -> Result<(), FormError> {
        self.ensure("advance", &[FormState::Step1])?;
        let errors = validate(&self.draft, Scope::Basics);
        if !errors.is_empty() {
            self.errors = errors.clone();
            return Err(FormError::Invalid(errors));
        }
        self.errors = ValidationErrors::default();
        self.draft.current_step = FormStep::Details;
        self.state = FormState::Step2;
        Ok(())
    }

    pub fn back(&mut self) -> Result<(), FormError> {
        self.ensure("go back", &[FormState::Step2])?;
        self.draft.current_step = FormStep::Basics;
        self.state = FormState::Step1;
        Ok(())
    }

    /// Validates the whole draft and, if clean, enters `Submitting` and
    /// returns the payload to hand off.
    pub fn begin_submit(&mut self) -> Result<SubmissionPayload, FormError> {
        self.ensure("submit", &[FormState::Step2])?;
        match SubmissionPayload::from_draft(&self.draft) {
            Ok(payload) => {
                self.errors = ValidationErrors::default();
                self.state = FormState::Submitting;
                Ok(payload)
            }
            Err(errors) => {
                self.errors = errors.clone();
                Err(FormError::Invalid(errors))
            }
        }
    }

    pub fn finish_submit(&mut self, outcome: Result<String, SubmitError>) -> Result<(), FormError> {
        self.ensure("complete a submission", &[FormState::Submitting])?;
        match outcome {
            Ok(event_id) => {
                self.event_id = Some(event_id);
                self.state = FormState::Submitted;
            }
            Err(_) => {
                self.errors.insert(Field::Submit, Field::Submit.message());
                self.state = FormState::Step2;
            }
        }
        Ok(())
    }

    pub fn reset(&mut self) -> Result<(), FormError> {
        self.ensure("reset", &[FormState::Submitted])?;
        *self = Self::new();
        Ok(())
    }

    /// Abandons the draft from any state except mid-submission.
    pub fn cancel(&mut self) -> Result<(), FormError> {
        self.ensure(
            "cancel",
            &[FormState::Step1, FormState::Step2, FormState::Submitted],
        )?;
        *self = Self::new();
        Ok(())
    }
}

/// Shares one [`SubmissionForm`] between callers and guarantees at most one
/// outstanding call to the submitter per form.
pub struct SubmissionController {
    form: Mutex<SubmissionForm>,
    submitter: Arc<dyn EventSubmitter>,
    timeout: Duration,
}

impl SubmissionController {
    pub fn new(submitter: Arc<dyn EventSubmitter>, timeout: Duration) -> Self {
        Self {
            form: Mutex::new(SubmissionForm::new()),
            submitter,
            timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SubmissionForm> {
        self.form.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> FormSnapshot {
        self.lock().snapshot()
    }

    pub fn update(&self, update: DraftUpdate) -> Result<(), FormError> {
        self.lock().update(update)
    }

    pub fn toggle_category(&self, category_id: &str) -> Result<(), FormError> {
        self.lock().toggle_category(category_id)
    }

    pub fn advance(&self) -> Result<(), FormError> {
        self.lock().advance()
    }

    pub fn back(&self) -> Result<(), FormError> {
        self.lock().back()
    }

    pub fn reset(&self) -> Result<(), FormError> {
        self.lock().reset()
    }

    pub fn cancel(&self) -> Result<(), FormError> {
        self.lock().cancel()
    }

    /// Runs the submission. A second call while one is pending is refused
    /// with [`FormError::InFlight`] without reaching the submitter.
    pub async fn submit(&self) -> Result<String, FormError> {
        let payload = self.lock().begin_submit()?;
        let mut pending = PendingSubmit { controller: self, armed: true };

        let outcome = match tokio::time::timeout(self.timeout, self.submitter.submit_event(payload)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SubmitError::TimedOut(self.timeout)),
        };
        pending.armed = false;

        match &outcome {
            Ok(event_id) => info!(%event_id, "event submission accepted"),
            Err(err) => warn!(error = %err, "event submission failed"),
        }
        self.lock().finish_submit(outcome.clone())?;
        outcome.map_err(FormError::Failed)
    }
}

/// Returns the form to `Step2` if the submit future is dropped before the
/// submitter answers.
struct PendingSubmit<'a> {
    controller: &'a SubmissionController,
    armed: bool,
}

impl Drop for PendingSubmit<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("event submission abandoned before completion");
            let _ = self
                .controller
                .lock()
                .finish_submit(Err(SubmitError::Cancelled));
        }
    }
}
