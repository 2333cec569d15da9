//! Multi-step workflow state with draft recovery.
//!
//! A workflow owns two persisted values derived from one form key:
//! - `<form_key>_data`: the form payload
//! - `<form_key>_state`: the current step index and the completed-step set
//!
//! Both share one expiration window and one save delay, but they are written
//! independently and may briefly disagree after a crash.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::persisted::{
    Callback, PersistOptions, PersistedData, Persistence, PersistentValue, Validator,
    DEFAULT_EXPIRATION_HOURS, DEFAULT_SAVE_DELAY,
};


/// Notification fired when a step is marked completed
pub type StepCallback<T> = Arc<dyn Fn(&str, &T) + Send + Sync>;

/// Errors raised while configuring a workflow or patching its data
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("form key must not be empty")]
    EmptyFormKey,

    #[error("workflow '{0}' declares no steps")]
    NoSteps(String),

    #[error("workflow '{form_key}' declares step '{step}' more than once")]
    DuplicateStep { form_key: String, step: String },

    #[error("form data patch must be a JSON object")]
    PatchNotObject,

    #[error("form data is not a JSON object and cannot be patched")]
    DataNotObject,

    #[error("form data patch does not fit the form shape: {0}")]
    InvalidPatch(#[source] serde_json::Error),
}

/// Storage key of a workflow's form payload
pub fn data_key(form_key: &str) -> String {
    format!("{form_key}_data")
}

/// Storage key of a workflow's navigation state
pub fn state_key(form_key: &str) -> String {
    format!("{form_key}_state")
}

/// Persisted position within the workflow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationState {
    pub current_step_index: usize,
    #[serde(default)]
    pub completed_steps: BTreeSet<String>,
}

/// Configuration for a [`MultiStepWorkflow`]
pub struct WorkflowOptions<T> {
    pub form_key: String,
    pub steps: Vec<String>,
    pub initial_data: T,
    pub expiration: Duration,
    pub save_delay: Duration,
    pub auto_save: bool,
    /// Applied to restored form data only
    pub validator: Option<Validator<T>>,
    pub on_restore: Option<Callback<T>>,
    pub on_save: Option<Callback<T>>,
    pub on_step_complete: Option<StepCallback<T>>,
    pub on_form_complete: Option<Callback<T>>,
}

impl<T> WorkflowOptions<T> {
    pub fn new<S: Into<String>>(
        form_key: impl Into<String>,
        steps: impl IntoIterator<Item = S>,
        initial_data: T,
    ) -> Self {
        Self {
            form_key: form_key.into(),
            steps: steps.into_iter().map(Into::into).collect(),
            initial_data,
            expiration: Duration::from_secs(DEFAULT_EXPIRATION_HOURS * 3600),
            save_delay: DEFAULT_SAVE_DELAY,
            auto_save: true,
            validator: None,
            on_restore: None,
            on_save: None,
            on_step_complete: None,
            on_form_complete: None,
        }
    }

    pub fn expiration_hours(mut self, hours: u64) -> Self {
        self.expiration = Duration::from_secs(hours.saturating_mul(3600));
        self
    }

    pub fn expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn save_delay(mut self, delay: Duration) -> Self {
        self.save_delay = delay;
        self
    }

    pub fn auto_save(mut self, auto_save: bool) -> Self {
        self.auto_save = auto_save;
        self
    }

    pub fn validate(mut self, validator: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn on_restore(mut self, callback: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_restore = Some(Arc::new(callback));
        self
    }

    pub fn on_save(mut self, callback: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_save = Some(Arc::new(callback));
        self
    }

    pub fn on_step_complete(
        mut self,
        callback: impl Fn(&str, &T) + Send + Sync + 'static,
    ) -> Self {
        self.on_step_complete = Some(Arc::new(callback));
        self
    }

    pub fn on_form_complete(mut self, callback: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_form_complete = Some(Arc::new(callback));
        self
    }

    fn validate_config(&self) -> Result<(), WorkflowError> {
        if self.form_key.trim().is_empty() {
            return Err(WorkflowError::EmptyFormKey);
        }
        if self.steps.is_empty() {
            return Err(WorkflowError::NoSteps(self.form_key.clone()));
        }

        let mut seen = BTreeSet::new();
        for step in &self.steps {
            if !seen.insert(step.as_str()) {
                return Err(WorkflowError::DuplicateStep {
                    form_key: self.form_key.clone(),
                    step: step.clone(),
                });
            }
        }
        Ok(())
    }

    fn store_options<U>(&self) -> PersistOptions<U> {
        PersistOptions::default()
            .expiration(self.expiration)
            .save_delay(self.save_delay)
            .auto_save(self.auto_save)
    }
}

/// A fixed, linear sequence of named steps over one persisted form payload
pub struct MultiStepWorkflow<T: PersistedData> {
    form_key: String,
    steps: Vec<String>,
    data: PersistentValue<T>,
    navigation: PersistentValue<NavigationState>,
    on_step_complete: Option<StepCallback<T>>,
    on_form_complete: Option<Callback<T>>,
}

impl<T: PersistedData> MultiStepWorkflow<T> {
    /// Build the workflow and restore any stored draft for `options.form_key`
    pub fn new(
        persistence: &Persistence,
        options: WorkflowOptions<T>,
    ) -> Result<Self, WorkflowError> {
        options.validate_config()?;

        let mut data_options = options.store_options::<T>();
        data_options.validator = options.validator.clone();
        data_options.on_restore = options.on_restore.clone();
        data_options.on_save = options.on_save.clone();

        let step_count = options.steps.len();
        let form_key = options.form_key.clone();
        let navigation_options = options
            .store_options::<NavigationState>()
            .validate(move |nav: &NavigationState| nav.current_step_index < step_count)
            .on_restore(move |nav: &NavigationState| {
                tracing::debug!(
                    form_key = %form_key,
                    step_index = nav.current_step_index,
                    completed = nav.completed_steps.len(),
                    "Restored workflow position"
                );
            });

        let data = persistence.value(
            data_key(&options.form_key),
            options.initial_data,
            data_options,
        );
        let navigation = persistence.value(
            state_key(&options.form_key),
            NavigationState::default(),
            navigation_options,
        );

        Ok(Self {
            form_key: options.form_key,
            steps: options.steps,
            data,
            navigation,
            on_step_complete: options.on_step_complete,
            on_form_complete: options.on_form_complete,
        })
    }

    pub fn form_key(&self) -> &str {
        &self.form_key
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn current_step_index(&self) -> usize {
        self.navigation.with_value(|nav| nav.current_step_index)
    }

    /// Identifier of the current step
    pub fn current_step(&self) -> &str {
        &self.steps[self.current_step_index()]
    }

    /// Snapshot of the persisted navigation state
    pub fn navigation(&self) -> NavigationState {
        self.navigation.value()
    }

    pub fn is_first_step(&self) -> bool {
        self.current_step_index() == 0
    }

    pub fn is_last_step(&self) -> bool {
        self.current_step_index() + 1 == self.steps.len()
    }

    /// Move to `index`. Out-of-range indices are ignored.
    pub fn go_to_step(&mut self, index: usize) -> bool {
        if index >= self.steps.len() {
            return false;
        }
        self.navigation.update_with(|nav| NavigationState {
            current_step_index: index,
            completed_steps: nav.completed_steps.clone(),
        });
        true
    }

    pub fn go_to_next_step(&mut self) -> bool {
        if self.is_last_step() {
            return false;
        }
        self.go_to_step(self.current_step_index() + 1)
    }

    pub fn go_to_previous_step(&mut self) -> bool {
        if self.is_first_step() {
            return false;
        }
        self.go_to_step(self.current_step_index() - 1)
    }

    /// Whether the user may navigate to `index`.
    ///
    /// Any step at or before the current one is reachable. A later step is
    /// reachable only when every step before it is completed.
    pub fn can_go_to_step(&self, index: usize) -> bool {
        if index >= self.steps.len() {
            return false;
        }
        self.navigation.with_value(|nav| {
            index <= nav.current_step_index
                || self.steps[..index]
                    .iter()
                    .all(|step| nav.completed_steps.contains(step))
        })
    }

    pub fn is_step_completed(&self, step: &str) -> bool {
        self.navigation
            .with_value(|nav| nav.completed_steps.contains(step))
    }

    /// Completed steps in declaration order
    pub fn completed_steps(&self) -> Vec<String> {
        self.navigation.with_value(|nav| {
            self.steps
                .iter()
                .filter(|step| nav.completed_steps.contains(*step))
                .cloned()
                .collect()
        })
    }

    /// Number of declared steps marked complete; stale names from an older
    /// step list are not counted
    pub fn completed_count(&self) -> usize {
        self.navigation.with_value(|nav| {
            self.steps
                .iter()
                .filter(|step| nav.completed_steps.contains(*step))
                .count()
        })
    }

    /// Add `step` to the completed set and notify `on_step_complete`.
    ///
    /// Steps not declared by this workflow are ignored.
    pub fn mark_step_completed(&mut self, step: &str) {
        if !self.steps.iter().any(|s| s == step) {
            tracing::warn!(form_key = %self.form_key, step, "Ignoring completion of unknown step");
            return;
        }

        self.navigation.update_with(|nav| {
            let mut next = nav.clone();
            next.completed_steps.insert(step.to_string());
            next
        });

        if let Some(callback) = &self.on_step_complete {
            let data = self.data.value();
            callback(step, &data);
        }
    }

    pub fn mark_current_step_completed(&mut self) {
        let step = self.current_step().to_string();
        self.mark_step_completed(&step);
    }

    /// Current form payload
    pub fn form_data(&self) -> T {
        self.data.value()
    }

    pub fn with_form_data<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.data.with_value(f)
    }

    /// Replace the whole form payload
    pub fn set_form_data(&mut self, data: T) {
        self.data.set_value(data);
    }

    /// Replace the form payload with `f(current)`
    pub fn update_form_data(&mut self, f: impl FnOnce(&T) -> T) {
        self.data.update_with(f);
    }

    /// Shallow-merge a JSON object into the form payload.
    ///
    /// Only top-level keys present in `patch` are replaced; nested objects are
    /// replaced whole. On error the payload is left untouched.
    pub fn merge_form_data(&mut self, patch: serde_json::Value) -> Result<(), WorkflowError> {
        let serde_json::Value::Object(patch) = patch else {
            return Err(WorkflowError::PatchNotObject);
        };

        let mut merged =
            serde_json::to_value(self.data.value()).map_err(WorkflowError::InvalidPatch)?;
        let fields = merged
            .as_object_mut()
            .ok_or(WorkflowError::DataNotObject)?;
        for (key, value) in patch {
            fields.insert(key, value);
        }

        let next: T = serde_json::from_value(merged).map_err(WorkflowError::InvalidPatch)?;
        self.data.set_value(next);
        Ok(())
    }

    /// Mark the current step completed and notify `on_form_complete`.
    ///
    /// Stored state is kept; call [`clear_form`](Self::clear_form) to drop it.
    pub fn complete_form(&mut self) {
        self.mark_current_step_completed();
        if let Some(callback) = &self.on_form_complete {
            let data = self.data.value();
            callback(&data);
        }
        tracing::info!(form_key = %self.form_key, "Form completed");
    }

    /// Delete both stored records and return to step 0 with default data
    pub fn clear_form(&mut self) {
        self.data.clear();
        self.navigation.clear();
        tracing::debug!(form_key = %self.form_key, "Cleared workflow");
    }

    /// Position-based progress: `round((index + 1) / steps * 100)`
    pub fn progress(&self) -> u8 {
        let position = (self.current_step_index() + 1) as f64;
        (position / self.steps.len() as f64 * 100.0).round() as u8
    }

    /// Whether a stored draft was restored when the workflow was built
    pub fn has_persisted_data(&self) -> bool {
        self.data.is_restored() || self.navigation.is_restored()
    }

    /// Write both stores immediately
    pub fn save_progress(&self) {
        self.data.save();
        self.navigation.save();
    }

    /// Perform any pending debounced writes now
    pub fn flush(&self) -> bool {
        let data_flushed = self.data.flush();
        let navigation_flushed = self.navigation.flush();
        data_flushed || navigation_flushed
    }

    pub fn has_pending_writes(&self) -> bool {
        self.data.has_pending_write() || self.navigation.has_pending_write()
    }

    /// Most recent write (or restored timestamp) of either store
    pub fn last_saved(&self) -> Option<DateTime<Utc>> {
        self.data.last_saved().max(self.navigation.last_saved())
    }
}
