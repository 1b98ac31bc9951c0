//! Per-building pipeline
//!
//! reference → identity → merge + audit (concurrently) → penalty → persist.
//!
//! Any stage error aborts the building: nothing is upserted and the failure
//! is written to the run log. A missing data source is not an error; its
//! field group is stored as known-absent and the penalty may be skipped.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::audit::select_audit;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::identity::{IdentityResolver, ResolvedIdentity};
use crate::keys::{Bbl, BuildingRef};
use crate::merge::{fetch_energy, merge_sources, ConflictReport, MergeOutcome, SourceSnapshot};
use crate::penalty::PenaltyEngine;
use crate::registries::Registries;
use crate::store::{
    FieldGroup, FieldMap, LeadStore, RunLogEntry, UpsertReceipt, OUTCOME_CACHED, OUTCOME_COMPLETED,
};
use crate::types::{
    AggregatedLeadRecord, BuildingCharacteristics, BuildingIdentity, EnergyProfile, FuelConsumption,
    ManualEntry, MechanicalAuditRecord, PenaltyResult, Provenance,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Identity,
    Merge,
    Audit,
    Calculate,
    Persist,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    Completed,
    /// Valid terminal state when inputs are absent
    Skipped { reason: String },
}

/// Result of one completed building run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub reference: String,
    pub key: Bbl,
    pub stages: BTreeMap<Stage, StageOutcome>,
    pub conflicts: Vec<ConflictReport>,
    pub receipt: UpsertReceipt,
    pub data_source: String,
}

/// Either the stored record was fresh enough, or a run happened
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Refresh {
    Cached { record: AggregatedLeadRecord },
    Fresh { report: RunReport },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub reference: String,
    pub kind: String,
    pub message: String,
}

/// Batch outcome; failures never stop the other buildings
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub succeeded: Vec<Refresh>,
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Groups to be upserted, built in full before any write
struct StagedRecord {
    identity: BuildingIdentity,
    characteristics: BuildingCharacteristics,
    energy: Option<EnergyProfile>,
    audit: Option<MechanicalAuditRecord>,
    penalty: PenaltyResult,
}

impl StagedRecord {
    fn data_source(&self) -> String {
        fn sources(provenance: &Provenance) -> String {
            let names: BTreeSet<&str> = provenance.values().map(|s| s.as_str()).collect();
            if names.is_empty() {
                "none".to_string()
            } else {
                names.into_iter().collect::<Vec<_>>().join("+")
            }
        }

        let mut parts = vec![
            format!("identity:{}", sources(&self.identity.provenance)),
            format!("characteristics:{}", sources(&self.characteristics.provenance)),
        ];
        if let Some(energy) = &self.energy {
            parts.push(format!("energy:{}", sources(&energy.provenance)));
        }
        if let Some(audit) = &self.audit {
            parts.push(format!("audit:{}", audit.era));
        }
        parts.join("; ")
    }

    fn field_map(&self, data_source: &str) -> blt_common::Result<FieldMap> {
        let mut fields = FieldMap::new();
        fields.set(FieldGroup::Identity, &self.identity)?;
        fields.set(FieldGroup::Characteristics, &self.characteristics)?;
        match &self.energy {
            Some(energy) => fields.set(FieldGroup::Energy, energy)?,
            None => fields.set_absent(FieldGroup::Energy),
        }
        match &self.audit {
            Some(audit) => fields.set(FieldGroup::Audit, audit)?,
            None => fields.set_absent(FieldGroup::Audit),
        }
        fields.set(FieldGroup::Penalty, &self.penalty)?;
        fields.set(FieldGroup::DataSource, &data_source)?;
        Ok(fields)
    }
}

pub struct Pipeline {
    registries: Registries,
    resolver: IdentityResolver,
    engine: PenaltyEngine,
    store: Arc<dyn LeadStore>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(registries: Registries, store: Arc<dyn LeadStore>, config: PipelineConfig) -> Self {
        let resolver = IdentityResolver::new(
            registries.clone(),
            config.geocode_confidence_threshold,
            config.retry.clone(),
        );
        let engine = PenaltyEngine::new(config.coefficients.clone(), config.missing_factor.clone());

        Self {
            registries,
            resolver,
            engine,
            store,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn LeadStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage for one building and persist the result
    pub async fn run(
        &self,
        reference: &BuildingRef,
        manual: Option<&ManualEntry>,
    ) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("building", reference = %reference, run_id = %run_id);

        async {
            let result = self.run_stages(run_id, reference, manual).await;

            let entry = match &result {
                Ok(report) => RunLogEntry {
                    run_id,
                    reference: reference.to_string(),
                    key: Some(report.key.clone()),
                    outcome: OUTCOME_COMPLETED.to_string(),
                    detail: report.receipt.changed.then(|| "record changed".to_string()),
                    finished_at: Utc::now(),
                },
                Err(err) => {
                    error!(kind = err.kind(), error = %err, "Building run aborted");
                    RunLogEntry {
                        run_id,
                        reference: reference.to_string(),
                        key: match reference {
                            BuildingRef::Key(key) => Some(key.clone()),
                            BuildingRef::Address(_) => None,
                        },
                        outcome: err.kind().to_string(),
                        detail: Some(err.to_string()),
                        finished_at: Utc::now(),
                    }
                }
            };
            self.log_run(&entry).await;

            result
        }
        .instrument(span)
        .await
    }

    async fn run_stages(
        &self,
        run_id: Uuid,
        reference: &BuildingRef,
        manual: Option<&ManualEntry>,
    ) -> Result<RunReport, PipelineError> {
        let mut stages = BTreeMap::new();

        let ResolvedIdentity { identity, structure } = self.resolver.resolve(reference, manual).await?;
        stages.insert(Stage::Identity, StageOutcome::Completed);
        let key = identity.key.clone();

        // Audit selection needs only the key, so it overlaps the energy fetch
        let (energy_record, audit) = tokio::try_join!(
            fetch_energy(
                self.registries.energy.as_ref(),
                &identity.secondary_keys,
                &self.config.retry
            ),
            select_audit(
                self.registries.newer_audits.as_ref(),
                self.registries.older_audits.as_ref(),
                &key,
                &self.config.retry
            ),
        )?;

        let MergeOutcome {
            characteristics,
            energy,
            conflicts,
        } = merge_sources(&SourceSnapshot {
            structure: structure.as_ref(),
            energy: energy_record.as_ref(),
            manual,
        });
        stages.insert(
            Stage::Merge,
            if energy.is_some() {
                StageOutcome::Completed
            } else {
                StageOutcome::Skipped {
                    reason: "no energy usage data".to_string(),
                }
            },
        );
        stages.insert(
            Stage::Audit,
            match &audit {
                Some(record) => {
                    debug!(era = %record.era, revision = record.revision_id, "Audit selected");
                    StageOutcome::Completed
                }
                None => StageOutcome::Skipped {
                    reason: "no mechanical audit on file".to_string(),
                },
            },
        );

        let penalty = match &energy {
            Some(profile) => self.engine.calculate(&profile.consumption, &profile.floor_areas),
            None => self.engine.calculate(&FuelConsumption::default(), &BTreeMap::new()),
        };
        stages.insert(
            Stage::Calculate,
            match &penalty {
                PenaltyResult::Computed { .. } => StageOutcome::Completed,
                PenaltyResult::Skipped { reason } => StageOutcome::Skipped {
                    reason: reason.clone(),
                },
            },
        );

        let staged = StagedRecord {
            identity,
            characteristics,
            energy,
            audit,
            penalty,
        };
        let data_source = staged.data_source();
        let fields = staged.field_map(&data_source)?;
        let receipt = self.store.upsert(&key, &fields).await?;
        stages.insert(Stage::Persist, StageOutcome::Completed);

        info!(
            bbl = %key,
            created = receipt.created,
            changed = receipt.changed,
            conflicts = conflicts.len(),
            "Building run completed"
        );

        Ok(RunReport {
            run_id,
            reference: reference.to_string(),
            key,
            stages,
            conflicts,
            receipt,
            data_source,
        })
    }

    /// Serve the stored record when it is younger than the staleness window
    ///
    /// Only key references can be checked without resolving; manual values
    /// always force a run since they are inputs the stored record never saw.
    pub async fn run_if_stale(
        &self,
        reference: &BuildingRef,
        manual: Option<&ManualEntry>,
    ) -> Result<Refresh, PipelineError> {
        if let (BuildingRef::Key(key), None) = (reference, manual) {
            if let Some(record) = self.fresh_record(key).await? {
                info!(bbl = %key, updated_at = %record.updated_at, "Stored record is fresh, skipping run");
                self.log_run(&RunLogEntry {
                    run_id: Uuid::new_v4(),
                    reference: reference.to_string(),
                    key: Some(key.clone()),
                    outcome: OUTCOME_CACHED.to_string(),
                    detail: None,
                    finished_at: Utc::now(),
                })
                .await;
                return Ok(Refresh::Cached { record });
            }
        }

        let report = self.run(reference, manual).await?;
        Ok(Refresh::Fresh { report })
    }

    async fn fresh_record(&self, key: &Bbl) -> Result<Option<AggregatedLeadRecord>, PipelineError> {
        let last_modified = self.store.last_modified(key).await?;
        let last_run = self.store.last_successful_run(key).await?;
        let Some(latest) = last_modified.into_iter().chain(last_run).max() else {
            return Ok(None);
        };

        if Utc::now() - latest >= self.config.staleness {
            return Ok(None);
        }
        Ok(self.store.get(key).await?)
    }

    /// Run many references with bounded concurrency
    pub async fn run_batch(&self, references: &[String], force: bool) -> BatchReport {
        let concurrency = self.config.concurrency;
        info!(buildings = references.len(), concurrency, force, "Batch started");

        // Owned references keep the batch future Send for any borrow of self
        let results: Vec<(String, Result<Refresh, PipelineError>)> =
            stream::iter(references.iter().cloned())
                .map(|text: String| async move {
                    let result = match BuildingRef::parse(&text) {
                        Ok(reference) if force => self
                            .run(&reference, None)
                            .await
                            .map(|report| Refresh::Fresh { report }),
                        Ok(reference) => self.run_if_stale(&reference, None).await,
                        Err(err) => Err(PipelineError::from(err)),
                    };
                    (text, result)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

        let mut report = BatchReport::default();
        for (reference, result) in results {
            match result {
                Ok(refresh) => report.succeeded.push(refresh),
                Err(err) => report.failed.push(BatchFailure {
                    reference,
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                }),
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Batch finished"
        );
        report
    }

    /// The run log is for review only; failing to write it never fails the run
    async fn log_run(&self, entry: &RunLogEntry) {
        if let Err(err) = self.store.record_run(entry).await {
            warn!(run_id = %entry.run_id, error = %err, "Failed to record pipeline run");
        }
    }
}
