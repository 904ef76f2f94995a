use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use keepsake_contracts::credentials::{Credential, CredentialProvider};
use keepsake_contracts::errors::CollageError;
use keepsake_contracts::events::{EventLog, EventPayload};
use keepsake_contracts::images::{EncodedImage, GeneratedImage};
use keepsake_contracts::scenarios::{Scenario, SCENARIOS, SCENARIO_COUNT};
use keepsake_contracts::settings::{CollageSettings, ConcurrencyMode};
use serde_json::{json, Value};

use crate::client::GenerationClient;
use crate::providers::GeneratedPayload;
use crate::{reference_fingerprint, timestamp_millis};

/// Settled result of one scenario's single generation attempt.
struct ScenarioOutcome {
    scenario: Scenario,
    result: Result<GeneratedPayload, CollageError>,
    elapsed: Duration,
}

/// Fans the ten scenarios out to the generation client under a `ConcurrencyMode`.
///
/// A run always produces one `GeneratedImage` per scenario, sorted by `scenario_index`: a failed
/// scenario gets the placeholder tile and never affects its siblings. Progress is reported from
/// the calling thread exactly once per settled scenario, so the callback needs no locking and
/// always sees a non-decreasing count. The orchestrator keeps no state between runs.
pub struct CollageOrchestrator {
    client: GenerationClient,
    mode: ConcurrencyMode,
    placeholder_url: String,
    events: EventLog,
}

impl CollageOrchestrator {
    pub fn new(client: GenerationClient, settings: &CollageSettings, events: EventLog) -> Self {
        Self {
            client,
            mode: settings.concurrency,
            placeholder_url: settings.placeholder_url.clone(),
            events,
        }
    }

    pub fn with_mode(mut self, mode: ConcurrencyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> ConcurrencyMode {
        self.mode
    }

    pub fn client(&self) -> &GenerationClient {
        &self.client
    }

    pub fn set_events(&mut self, events: EventLog) {
        self.events = events;
    }

    /// Reads the credential once, then generates every scenario.
    ///
    /// Fails only when no credential is available (nothing is sent) or when the collected results
    /// break the one-tile-per-scenario invariant.
    pub fn run(
        &self,
        reference_images: &[EncodedImage],
        credentials: &dyn CredentialProvider,
        on_progress: &mut dyn FnMut(usize),
    ) -> Result<Vec<GeneratedImage>, CollageError> {
        let credential = credentials
            .credential()
            .ok_or(CollageError::MissingCredential)?;
        let started = Instant::now();
        self.note(
            "generation_started",
            json!({
                "mode": self.mode.to_string(),
                "workers": self.mode.workers(),
                "model": self.client.model().name,
                "provider": self.client.provider_name(),
                "reference_images": reference_images.len().min(self.client.reference_limit()),
                "reference_fingerprint": reference_fingerprint(reference_images),
                "scenarios": SCENARIO_COUNT,
            }),
        );

        let mut completed = 0usize;
        let mut results: Vec<GeneratedImage> = Vec::with_capacity(SCENARIO_COUNT);
        let mut settle = |outcome: ScenarioOutcome| {
            completed += 1;
            results.push(self.tile_for(outcome));
            self.note(
                "progress",
                json!({ "completed": completed, "total": SCENARIO_COUNT }),
            );
            on_progress(completed);
        };

        match self.mode {
            ConcurrencyMode::Sequential => {
                self.run_pool(&SCENARIOS, 1, reference_images, &credential, &mut settle)
            }
            ConcurrencyMode::Parallel(_) => self.run_pool(
                &SCENARIOS,
                self.mode.workers(),
                reference_images,
                &credential,
                &mut settle,
            ),
            ConcurrencyMode::Batched(_) => {
                for wave in SCENARIOS.chunks(self.mode.workers()) {
                    let mut settled = Vec::with_capacity(wave.len());
                    self.run_pool(
                        wave,
                        wave.len(),
                        reference_images,
                        &credential,
                        &mut |outcome| settled.push(outcome),
                    );
                    settled.sort_by_key(|outcome| outcome.scenario.index);
                    for outcome in settled {
                        settle(outcome);
                    }
                }
            }
        }

        results.sort_by_key(|result| result.scenario_index);
        let indices_complete = results.len() == SCENARIO_COUNT
            && results
                .iter()
                .enumerate()
                .all(|(position, result)| result.scenario_index == position);
        if !indices_complete {
            let message = format!(
                "expected one result per scenario, collected {} for indices {:?}",
                results.len(),
                results
                    .iter()
                    .map(|result| result.scenario_index)
                    .collect::<Vec<usize>>()
            );
            self.note("run_failed", json!({ "error": message }));
            return Err(CollageError::Run(message));
        }

        let succeeded = results.iter().filter(|result| result.succeeded).count();
        self.note(
            "generation_finished",
            json!({
                "succeeded": succeeded,
                "failed": SCENARIO_COUNT - succeeded,
                "elapsed_ms": started.elapsed().as_millis() as u64,
            }),
        );
        Ok(results)
    }

    /// Runs `scenarios` on at most `workers` scoped threads and hands each outcome to `sink` on
    /// the calling thread as it settles.
    fn run_pool(
        &self,
        scenarios: &[Scenario],
        workers: usize,
        reference_images: &[EncodedImage],
        credential: &Credential,
        sink: &mut dyn FnMut(ScenarioOutcome),
    ) {
        let workers = workers.clamp(1, scenarios.len().max(1));
        if workers == 1 {
            for scenario in scenarios {
                sink(self.attempt(*scenario, reference_images, credential));
            }
            return;
        }

        let cursor = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel::<ScenarioOutcome>();
        thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let cursor = &cursor;
                scope.spawn(move || loop {
                    let next = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(scenario) = scenarios.get(next) else {
                        break;
                    };
                    let outcome = self.attempt(*scenario, reference_images, credential);
                    if tx.send(outcome).is_err() {
                        break;
                    }
                });
            }
            drop(tx);
            for outcome in rx {
                sink(outcome);
            }
        });
    }

    fn attempt(
        &self,
        scenario: Scenario,
        reference_images: &[EncodedImage],
        credential: &Credential,
    ) -> ScenarioOutcome {
        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.client.generate(reference_images, scenario, credential)
        }))
        .unwrap_or_else(|_| {
            Err(CollageError::Generation {
                scenario_index: scenario.index,
                message: "image provider panicked".to_string(),
            })
        });
        ScenarioOutcome {
            scenario,
            result,
            elapsed: started.elapsed(),
        }
    }

    fn tile_for(&self, outcome: ScenarioOutcome) -> GeneratedImage {
        let index = outcome.scenario.index;
        let elapsed_ms = outcome.elapsed.as_millis() as u64;
        match outcome.result {
            Ok(payload) => {
                self.note(
                    "scenario_completed",
                    json!({
                        "scenario_index": index,
                        "media_type": payload.media_type,
                        "bytes": payload.bytes.len(),
                        "elapsed_ms": elapsed_ms,
                    }),
                );
                GeneratedImage {
                    id: format!("gen-{index}-{}", timestamp_millis()),
                    display_url: payload.display_url(),
                    scenario_index: index,
                    prompt: outcome.scenario.text.to_string(),
                    succeeded: true,
                }
            }
            Err(err) => {
                self.note(
                    "scenario_failed",
                    json!({
                        "scenario_index": index,
                        "error": err.to_string(),
                        "elapsed_ms": elapsed_ms,
                    }),
                );
                GeneratedImage::placeholder(index, &self.placeholder_url)
            }
        }
    }

    fn note(&self, event_type: &str, payload: Value) {
        let payload: EventPayload = match payload {
            Value::Object(map) => map,
            _ => EventPayload::new(),
        };
        if let Err(err) = self.events.emit(event_type, payload) {
            eprintln!("keepsake: failed to log {event_type}: {err:#}");
        }
    }
}
