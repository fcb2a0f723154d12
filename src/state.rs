use crate::catalog::{Catalog, CatalogSubmitter};
use crate::config::Settings;
use crate::error::AppError;
use crate::submission::{EventSubmitter, SubmissionController};
use nanoid::nanoid;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tracing::debug;

struct FormSlot {
    controller: Arc<SubmissionController>,
    touched: Instant,
}

type Forms = Arc<RwLock<HashMap<String, FormSlot>>>;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub settings: Arc<Settings>,
    submitter: Arc<dyn EventSubmitter>,
    forms: Forms,
}

impl AppState {
    pub fn new(catalog: Arc<Catalog>, settings: Settings) -> Self {
        let submitter = Arc::new(CatalogSubmitter::new(catalog.clone()));
        Self::with_submitter(catalog, settings, submitter)
    }

    pub fn with_submitter(
        catalog: Arc<Catalog>,
        settings: Settings,
        submitter: Arc<dyn EventSubmitter>,
    ) -> Self {
        Self {
            catalog,
            settings: Arc::new(settings),
            submitter,
            forms: Arc::default(),
        }
    }

    /// Starts a fresh submission form and returns its id.
    ///
    /// Forms idle for longer than `form_idle_timeout` are dropped first; if
    /// the map is still at `max_open_forms`, the least recently used go too.
    pub fn open_form(&self) -> (String, Arc<SubmissionController>) {
        let now = Instant::now();
        let id = nanoid!(10);
        let form = Arc::new(SubmissionController::new(
            self.submitter.clone(),
            self.settings.submit_timeout,
        ));

        let mut forms = self.forms.write().unwrap_or_else(PoisonError::into_inner);
        self.evict(&mut forms, now);
        forms.insert(
            id.clone(),
            FormSlot { controller: form.clone(), touched: now },
        );
        debug!(form = %id, open = forms.len(), "opened submission form");
        (id, form)
    }

    /// Looks up a form and marks it as recently used.
    pub fn form(&self, id: &str) -> Result<Arc<SubmissionController>, AppError> {
        let mut forms = self.forms.write().unwrap_or_else(PoisonError::into_inner);
        let slot = forms
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound("no such submission".to_string()))?;
        slot.touched = Instant::now();
        Ok(slot.controller.clone())
    }

    /// Forgets a form. Callers still holding its controller keep a working
    /// handle; later lookups by id answer `NotFound`.
    pub fn close_form(&self, id: &str) {
        let removed = self
            .forms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if removed.is_some() {
            debug!(form = %id, "closed submission form");
        }
    }

    fn evict(&self, forms: &mut HashMap<String, FormSlot>, now: Instant) {
        let idle = self.settings.form_idle_timeout;
        let before = forms.len();
        forms.retain(|_, slot| now.saturating_duration_since(slot.touched) < idle);

        while forms.len() >= self.settings.max_open_forms {
            let oldest = forms
                .iter()
                .min_by_key(|(_, slot)| slot.touched)
                .map(|(id, _)| id.clone());
            let Some(id) = oldest else { break };
            forms.remove(&id);
        }

        if forms.len() < before {
            debug!(evicted = before - forms.len(), "evicted submission forms");
        }
    }

    #[cfg(test)]
    fn open_forms(&self) -> usize {
        self.forms.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
