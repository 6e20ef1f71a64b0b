//! Batch and transaction bundle execution.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use fhirkit_api::{Bundle, BundleEntry, BundleType, IssueType};
use fhirkit_storage::{DynStorage, StorageError};
use futures_util::{StreamExt, stream};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::dedup::{DedupCandidate, RouteDeduplicator};
use crate::dispatch::{ConditionalHeaders, DispatchContext, RequestDispatcher, ResponseEnvelope};
use crate::error::BundleError;
use crate::references::{
    EntryRef, ReferencePlan, ReferenceResolver, Resolution, is_placeholder, resolved_identity,
};
use crate::route::RouteResolver;
use crate::verb::{EXECUTION_ORDER, HttpVerb};

#[derive(Debug, Clone)]
pub struct BundleConfig {
    /// Bundles with more entries are rejected before anything runs.
    pub max_entries: usize,
    /// Dispatches in flight at once within one bucket wave.
    pub max_concurrency: usize,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            max_concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Batch,
    Transaction,
}

impl Mode {
    fn response_type(self) -> BundleType {
        match self {
            Mode::Batch => BundleType::BatchResponse,
            Mode::Transaction => BundleType::TransactionResponse,
        }
    }
}

/// A validated entry request.
#[derive(Debug)]
struct PendingEntry {
    verb: HttpVerb,
    full_url: Option<String>,
    url: String,
    body: Option<Value>,
    headers: ConditionalHeaders,
}

/// An entry that passed substitution and route resolution in the current wave.
struct ReadyEntry {
    url: String,
    body: Option<Value>,
}

/// Executes batch and transaction bundles.
///
/// Entries run bucket by bucket in [`EXECUTION_ORDER`]. Within a bucket,
/// independent entries are dispatched concurrently and identical reads are
/// dispatched once. Responses keep the position of their request.
pub struct BundleHandler {
    resolver: Arc<dyn RouteResolver>,
    dispatcher: Arc<dyn RequestDispatcher>,
    storage: DynStorage,
    config: BundleConfig,
}

impl BundleHandler {
    pub fn new(
        resolver: Arc<dyn RouteResolver>,
        dispatcher: Arc<dyn RequestDispatcher>,
        storage: DynStorage,
        config: BundleConfig,
    ) -> Self {
        Self {
            resolver,
            dispatcher,
            storage,
            config,
        }
    }

    pub async fn execute(&self, bundle: Bundle) -> Result<Bundle, BundleError> {
        self.execute_with_cancellation(bundle, CancellationToken::new())
            .await
    }

    /// Like [`BundleHandler::execute`]; cancelling stops in-flight dispatches,
    /// starts no further bucket and rolls a transaction back.
    pub async fn execute_with_cancellation(
        &self,
        bundle: Bundle,
        cancel: CancellationToken,
    ) -> Result<Bundle, BundleError> {
        let mode = self.validate(&bundle)?;
        let entries = prepare(bundle.entry)?;

        let span = tracing::info_span!(
            "bundle",
            bundle_type = %bundle.bundle_type,
            entries = entries.len()
        );
        self.run(mode, entries, cancel).instrument(span).await
    }

    fn validate(&self, bundle: &Bundle) -> Result<Mode, BundleError> {
        if bundle.resource_type != "Bundle" {
            return Err(BundleError::invalid(format!(
                "Expected resourceType 'Bundle', found '{}'.",
                bundle.resource_type
            )));
        }
        let mode = match bundle.bundle_type {
            BundleType::Batch => Mode::Batch,
            BundleType::Transaction => Mode::Transaction,
            other => {
                return Err(BundleError::invalid(format!(
                    "Bundle type '{other}' cannot be processed; expected 'batch' or 'transaction'."
                )));
            }
        };
        if bundle.entry.len() > self.config.max_entries {
            return Err(BundleError::invalid(format!(
                "Bundle has {} entries; at most {} are allowed.",
                bundle.entry.len(),
                self.config.max_entries
            )));
        }
        Ok(mode)
    }

    async fn run(
        &self,
        mode: Mode,
        entries: Vec<PendingEntry>,
        cancel: CancellationToken,
    ) -> Result<Bundle, BundleError> {
        let refs: Vec<EntryRef<'_>> = entries
            .iter()
            .map(|e| EntryRef {
                verb: e.verb,
                full_url: e.full_url.as_deref(),
                url: &e.url,
                body: e.body.as_ref(),
            })
            .collect();
        let plan = ReferenceResolver::plan(&refs);

        let mut buckets: BTreeMap<HttpVerb, Vec<usize>> =
            HttpVerb::ALL.into_iter().map(|v| (v, Vec::new())).collect();
        for (index, entry) in entries.iter().enumerate() {
            buckets.entry(entry.verb).or_default().push(index);
        }

        let mut context = match mode {
            Mode::Transaction => {
                let tx = self.storage.begin_transaction().await?;
                DispatchContext::with_transaction(Arc::new(Mutex::new(tx)))
            }
            Mode::Batch => DispatchContext::default(),
        };

        let mut responses: Vec<Option<ResponseEnvelope>> = vec![None; entries.len()];
        let mut resolutions = vec![Resolution::Pending; entries.len()];

        for verb in EXECUTION_ORDER {
            let indices = buckets.get(&verb).map_or(&[][..], Vec::as_slice);
            if indices.is_empty() {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(self.abort(&mut context, BundleError::Cancelled).await);
            }

            let mut live = Vec::with_capacity(indices.len());
            let mut pre_failed = Vec::new();
            for &index in indices {
                match plan.failure(index) {
                    Some(err) => {
                        responses[index] = Some(ResponseEnvelope::from(err));
                        resolutions[index] = Resolution::Failed;
                        pre_failed.push(index);
                    }
                    None => live.push(index),
                }
            }
            if mode == Mode::Transaction
                && let Some(err) = first_failure(&pre_failed, &responses)
            {
                return Err(self.abort(&mut context, err).await);
            }

            let mut dispatched = 0;
            for wave in plan.waves(&live) {
                let outcome = self
                    .run_wave(&wave, &entries, &plan, &mut resolutions, &context, &cancel)
                    .await;
                let settled = match outcome {
                    Ok(settled) => settled,
                    Err(err) => return Err(self.abort(&mut context, err).await),
                };
                dispatched += settled.dispatched;
                for (index, envelope) in settled.envelopes {
                    responses[index] = Some(envelope);
                }
                if mode == Mode::Transaction
                    && let Some(err) = first_failure(&wave, &responses)
                {
                    return Err(self.abort(&mut context, err).await);
                }
            }

            tracing::debug!(
                verb = %verb,
                entries = indices.len(),
                dispatched,
                "bucket executed"
            );
        }

        if let Some(transaction) = context.transaction.take() {
            let transaction = Arc::try_unwrap(transaction).map_err(|_| {
                StorageError::transaction_error("transaction handle is still shared at commit")
            })?;
            transaction.into_inner().commit().await?;
        }

        let entries: Vec<BundleEntry> = responses
            .into_iter()
            .map(|envelope| {
                envelope
                    .unwrap_or_else(|| {
                        ResponseEnvelope::error(500, IssueType::Exception, "Entry was not executed.")
                    })
                    .into_entry()
            })
            .collect();

        tracing::info!(entries = entries.len(), "bundle completed");
        Ok(Bundle::new(mode.response_type(), entries))
    }

    /// Substitutes, resolves, deduplicates and dispatches one wave, then records
    /// the identities later entries may refer to.
    async fn run_wave(
        &self,
        wave: &[usize],
        entries: &[PendingEntry],
        plan: &ReferencePlan,
        resolutions: &mut [Resolution],
        context: &DispatchContext,
        cancel: &CancellationToken,
    ) -> Result<WaveOutcome, BundleError> {
        let mut envelopes: Vec<(usize, ResponseEnvelope)> = Vec::with_capacity(wave.len());
        let mut ready: HashMap<usize, ReadyEntry> = HashMap::with_capacity(wave.len());
        let mut candidates = Vec::with_capacity(wave.len());

        for &index in wave {
            let entry = &entries[index];
            let (url, body) = match ReferenceResolver::substitute(
                plan.dependencies(index),
                &entry.url,
                entry.body.as_ref(),
                resolutions,
            ) {
                Ok(resolved) => resolved,
                Err(err) => {
                    envelopes.push((index, ResponseEnvelope::from(&err)));
                    continue;
                }
            };
            match self.resolver.resolve(entry.verb, &url) {
                Ok(route) => {
                    candidates.push(DedupCandidate {
                        index,
                        route,
                        coalesce: !entry.headers.has_read_conditions(),
                    });
                    ready.insert(index, ReadyEntry { url, body });
                }
                Err(not_found) => {
                    tracing::debug!(index, error = %not_found, "entry route not found");
                    envelopes.push((index, ResponseEnvelope::from(not_found)));
                }
            }
        }

        let execution = RouteDeduplicator::plan(candidates);
        let dispatched = execution.len();
        let ready_ref = &ready;
        let results = stream::iter(execution.units)
            .map(|unit| async move {
                let leader = unit.leader();
                let body = ready_ref.get(&leader).and_then(|r| r.body.as_ref());
                let envelope = self
                    .dispatcher
                    .dispatch(&unit.route, body, &entries[leader].headers, context)
                    .await
                    .unwrap_or_else(|err| {
                        tracing::warn!(index = leader, error = %err, "entry dispatch failed");
                        ResponseEnvelope::from(err)
                    });
                (unit.indices, envelope)
            })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect::<Vec<_>>();

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BundleError::Cancelled),
            results = results => results,
        };

        for (indices, envelope) in results {
            for index in indices {
                envelopes.push((index, envelope.clone()));
            }
        }

        for (index, envelope) in &envelopes {
            resolutions[*index] = if envelope.is_failure() {
                Resolution::Failed
            } else {
                let url = ready.get(index).map_or(entries[*index].url.as_str(), |r| r.url.as_str());
                resolved_identity(envelope.location.as_deref(), url)
                    .map_or(Resolution::Unresolvable, Resolution::Resolved)
            };
        }

        Ok(WaveOutcome {
            envelopes,
            dispatched,
        })
    }

    /// Rolls back the transaction, if any, and hands back `err`.
    async fn abort(&self, context: &mut DispatchContext, err: BundleError) -> BundleError {
        tracing::warn!(error = %err, "bundle aborted");
        let Some(transaction) = context.transaction.take() else {
            return err;
        };
        match Arc::try_unwrap(transaction) {
            Ok(transaction) => {
                if let Err(rollback) = transaction.into_inner().rollback().await {
                    tracing::warn!(error = %rollback, "transaction rollback failed");
                }
            }
            Err(_) => tracing::warn!("transaction handle is still shared; rollback skipped"),
        }
        err
    }
}

struct WaveOutcome {
    envelopes: Vec<(usize, ResponseEnvelope)>,
    dispatched: usize,
}

/// The lowest-index failed entry among `indices`, as a transaction failure.
fn first_failure(indices: &[usize], responses: &[Option<ResponseEnvelope>]) -> Option<BundleError> {
    indices
        .iter()
        .copied()
        .filter_map(|index| {
            responses[index]
                .as_ref()
                .filter(|e| e.is_failure())
                .map(|e| (index, e))
        })
        .min_by_key(|(index, _)| *index)
        .map(|(index, envelope)| BundleError::TransactionFailed {
            index,
            status: envelope.status,
            outcome: envelope.failure_outcome(),
        })
}

fn prepare(entries: Vec<BundleEntry>) -> Result<Vec<PendingEntry>, BundleError> {
    let mut full_urls = HashSet::new();
    let mut prepared = Vec::with_capacity(entries.len());

    for (index, entry) in entries.into_iter().enumerate() {
        let request = entry
            .request
            .ok_or_else(|| BundleError::invalid(format!("Entry {index} has no request.")))?;
        let verb = request
            .method
            .parse::<HttpVerb>()
            .map_err(|e| BundleError::invalid(format!("Entry {index}: {e}.")))?;
        let url = request.url.trim();
        if url.is_empty() {
            return Err(BundleError::invalid(format!("Entry {index} has an empty request url.")));
        }
        if let Some(full_url) = entry.full_url.as_deref().filter(|u| is_placeholder(u))
            && !full_urls.insert(full_url.to_string())
        {
            return Err(BundleError::invalid(format!(
                "Entry {index} repeats fullUrl '{full_url}'."
            )));
        }
        let body = entry
            .resource
            .map(|raw| raw.to_value())
            .transpose()
            .map_err(|e| BundleError::invalid(format!("Entry {index} has an unreadable resource: {e}")))?;

        prepared.push(PendingEntry {
            verb,
            full_url: entry.full_url,
            url: url.to_string(),
            body,
            headers: ConditionalHeaders::from(&request),
        });
    }

    Ok(prepared)
}
