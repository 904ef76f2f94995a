use anyhow::{anyhow, Result};
use keepsake_contracts::credentials::CredentialProvider;
use keepsake_contracts::errors::CollageError;
use keepsake_contracts::events::EventLog;
use keepsake_contracts::images::EncodedImage;
use keepsake_contracts::models::{ModelSelection, ModelSelector};
use keepsake_contracts::runs::state::{RunState, RunStatus};
use keepsake_contracts::runs::summary::{now_utc_iso, RunSummary};
use keepsake_contracts::settings::CollageSettings;
use serde_json::{json, Value};

use crate::client::GenerationClient;
use crate::orchestrator::CollageOrchestrator;
use crate::preprocess::{preprocess_batch, RawPhoto};
use crate::providers::ImageProviderRegistry;

/// One user's collage workflow: upload gate, credential gate, preprocessing, generation.
///
/// Owns the `RunState` that a front end renders. Every transition goes through `&mut self`,
/// so the state is never observed half-written.
pub struct CollageSession {
    settings: CollageSettings,
    credentials: Box<dyn CredentialProvider>,
    orchestrator: CollageOrchestrator,
    selection: ModelSelection,
    events: EventLog,
    state: RunState,
    reference_images: usize,
    started_at: Option<String>,
    finished_at: Option<String>,
}

impl CollageSession {
    /// Resolves `settings.model` against the model registry and wires the matching provider.
    pub fn from_settings(
        settings: CollageSettings,
        credentials: Box<dyn CredentialProvider>,
        events: EventLog,
        providers: &ImageProviderRegistry,
    ) -> Result<Self> {
        let selection = ModelSelector::default()
            .select(Some(&settings.model))
            .map_err(|reason| anyhow!(reason))?;
        if let Some(reason) = &selection.fallback_reason {
            events.emit(
                "model_fallback",
                object(json!({
                    "requested": selection.requested,
                    "model": selection.model.name,
                    "reason": reason,
                })),
            )?;
        }

        let provider = providers.get(&selection.model.provider).ok_or_else(|| {
            anyhow!(
                "no image provider named '{}' (registered: {})",
                selection.model.provider,
                providers.names().join(", ")
            )
        })?;
        let client = GenerationClient::new(provider, selection.model.clone(), &settings);
        let orchestrator = CollageOrchestrator::new(client, &settings, events.clone());
        Ok(Self {
            settings,
            credentials,
            orchestrator,
            selection,
            events,
            state: RunState::new(),
            reference_images: 0,
            started_at: None,
            finished_at: None,
        })
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn settings(&self) -> &CollageSettings {
        &self.settings
    }

    pub fn selection(&self) -> &ModelSelection {
        &self.selection
    }

    pub fn run_id(&self) -> &str {
        self.events.run_id()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Asks the credential provider once when nothing is configured yet.
    pub fn ensure_credential(&self) -> Result<(), CollageError> {
        if self.credentials.has_credential() {
            return Ok(());
        }
        self.credentials.request_credential();
        if self.credentials.has_credential() {
            return Ok(());
        }
        self.note("credential_missing", json!({}));
        Err(CollageError::MissingCredential)
    }

    /// Encodes the uploads, dropping unreadable ones, and re-checks the batch bounds on the
    /// survivors.
    pub fn prepare(&self, photos: &[RawPhoto]) -> Result<Vec<EncodedImage>, CollageError> {
        self.settings.check_batch_size(photos.len())?;
        let (encoded, rejected) = preprocess_batch(photos, &self.settings, &self.events);
        self.note(
            "photos_prepared",
            json!({
                "accepted": encoded.len(),
                "rejected": rejected.len(),
                "max_dimension": self.settings.max_dimension,
            }),
        );
        self.settings.check_batch_size(encoded.len())?;
        Ok(encoded)
    }

    /// Runs all scenarios against already-encoded references.
    ///
    /// A missing credential leaves the session `Idle`; any other run error marks it `Failed`.
    pub fn generate(
        &mut self,
        reference_images: &[EncodedImage],
        on_progress: &mut dyn FnMut(usize),
    ) -> Result<&RunState, CollageError> {
        self.state.begin()?;
        self.started_at = Some(now_utc_iso());
        self.finished_at = None;
        self.reference_images = reference_images
            .len()
            .min(self.orchestrator.client().reference_limit());

        let Self {
            orchestrator,
            credentials,
            state,
            ..
        } = &mut *self;
        let outcome = orchestrator.run(reference_images, &**credentials, &mut |completed| {
            state.record_progress(completed);
            on_progress(completed);
        });
        self.finished_at = Some(now_utc_iso());

        match outcome {
            Ok(results) => {
                self.state.complete(results);
                Ok(&self.state)
            }
            Err(CollageError::MissingCredential) => {
                self.state.reset();
                Err(CollageError::MissingCredential)
            }
            Err(err) => {
                self.state.fail(err.to_string());
                Err(err)
            }
        }
    }

    /// Upload gate, credential gate, preprocessing, then generation. The provider is never
    /// called unless both gates pass.
    pub fn start(
        &mut self,
        photos: &[RawPhoto],
        on_progress: &mut dyn FnMut(usize),
    ) -> Result<&RunState, CollageError> {
        if self.state.status == RunStatus::Generating {
            return Err(CollageError::Run(
                "a generation run is already in progress".to_string(),
            ));
        }
        self.settings.check_batch_size(photos.len())?;
        self.ensure_credential()?;
        self.note(
            "run_started",
            json!({
                "photos": photos.len(),
                "model": self.selection.model.name,
                "concurrency": self.orchestrator.mode().to_string(),
            }),
        );
        let references = self.prepare(photos)?;
        self.generate(&references, on_progress)
    }

    /// Back to `Idle` with an empty result set and a fresh run id.
    pub fn reset(&mut self) {
        let previous = self.events.run_id().to_string();
        let run_id = uuid::Uuid::new_v4().to_string();
        self.events = self.events.for_run(run_id);
        self.orchestrator.set_events(self.events.clone());
        self.state.reset();
        self.reference_images = 0;
        self.started_at = None;
        self.finished_at = None;
        self.note("run_reset", json!({ "previous_run_id": previous }));
    }

    /// Present only once a run has completed.
    pub fn summary(&self) -> Option<RunSummary> {
        if self.state.status != RunStatus::Complete {
            return None;
        }
        Some(RunSummary {
            run_id: self.events.run_id().to_string(),
            started_at: self.started_at.clone().unwrap_or_default(),
            finished_at: self.finished_at.clone().unwrap_or_default(),
            model: self.selection.model.name.clone(),
            concurrency: self.orchestrator.mode().to_string(),
            reference_images: self.reference_images,
            succeeded: self.state.succeeded_count(),
            failed: self.state.failed_count(),
            results: self.state.results.clone(),
        })
    }

    fn note(&self, event_type: &str, payload: Value) {
        if let Err(err) = self.events.emit(event_type, object(payload)) {
            eprintln!("keepsake: failed to log {event_type}: {err:#}");
        }
    }
}

fn object(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}
