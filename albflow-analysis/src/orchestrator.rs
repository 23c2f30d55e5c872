//! The adaptive analysis orchestrator.
//!
//! Strategy is a tagged variant chosen once per request from the
//! filter's record count: full in-memory below the ceiling, the
//! aggregated fast path when summary data exists, and streaming with
//! Bernoulli sampling otherwise. Results are cached with a TTL and a
//! small capacity bound.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use albflow_aggregate::UrlNormalizer;
use albflow_core::config::{AlbFlowConfig, AnalysisConfig, AnalysisConfigPatch};
use albflow_core::errors::AnalysisError;
use albflow_core::models::{
    AnalysisResult, AnalysisSummary, ConversionFunnel, EndpointCount, FilterCriteria,
    HourlySummary, Insight, InsightKind, LogRecord, Session, Severity, WorkflowAnalysis,
    WorkflowPattern,
};
use albflow_core::traits::IAnalyticsStore;
use chrono::Utc;
use moka::sync::Cache;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::insights::generate_summary;
use crate::patterns::{pattern_similarity, PatternDiscoverer};
use crate::session::SessionReconstructor;

/// Streaming accumulation is chunked into the session reconstructor at
/// this size.
const SESSION_CHUNK: usize = 10_000;
/// The streaming path returns at most this many sessions.
const MAX_RETURNED_SESSIONS: usize = 1_000;

/// Which analysis arm a request takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Full,
    Aggregated,
    StreamingSampled,
}

/// Workflow-level filters, applied against both the raw and the
/// normalised URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzeOptions {
    pub include_endpoints: Vec<String>,
    pub exclude_endpoints: Vec<String>,
    pub exclude_user_agent_patterns: Vec<String>,
}

pub type ProgressFn = Box<dyn Fn(u64) + Send + Sync>;

pub struct WorkflowAnalyzer {
    store: Arc<dyn IAnalyticsStore>,
    config: Mutex<AnalysisConfig>,
    reconstructor: SessionReconstructor,
    discoverer: PatternDiscoverer,
    normalizer: UrlNormalizer,
    cache: Mutex<Cache<String, Arc<AnalysisResult>>>,
    progress_callback: Mutex<Option<ProgressFn>>,
}

impl WorkflowAnalyzer {
    pub fn new(store: Arc<dyn IAnalyticsStore>, config: &AlbFlowConfig) -> Self {
        Self {
            store,
            cache: Mutex::new(build_cache(&config.analysis)),
            config: Mutex::new(config.analysis.clone()),
            reconstructor: SessionReconstructor::new(config.session.clone()),
            discoverer: PatternDiscoverer::new(config.pattern.clone()),
            normalizer: UrlNormalizer::new(),
            progress_callback: Mutex::new(None),
        }
    }

    /// Observer for the streaming path; called with the scanned-row
    /// count between batches.
    pub fn set_progress_callback(&self, callback: ProgressFn) {
        *lock(&self.progress_callback) = Some(callback);
    }

    /// Pick the strategy for a filter without running the analysis.
    pub fn select_strategy(&self, filter: &FilterCriteria) -> Result<Strategy, AnalysisError> {
        let config = lock(&self.config).clone();
        let n = self.store.count(filter)?;
        if n <= config.max_sessions_for_full_analysis {
            return Ok(Strategy::Full);
        }
        if config.use_aggregation_tables && !self.store.query_aggregated(filter)?.is_empty() {
            return Ok(Strategy::Aggregated);
        }
        Ok(Strategy::StreamingSampled)
    }

    pub fn analyze(
        &self,
        filter: &FilterCriteria,
        options: &AnalyzeOptions,
    ) -> Result<AnalysisResult, AnalysisError> {
        let started = Instant::now();
        let config = lock(&self.config).clone();

        let cache_key = config
            .enable_caching
            .then(|| make_cache_key(filter, options));
        if let Some(key) = &cache_key {
            if let Some(hit) = lock(&self.cache).get(key) {
                debug!("analysis cache hit");
                return Ok((*hit).clone());
            }
        }

        let strategy = self.select_strategy(filter)?;
        info!(?strategy, "analysis strategy selected");

        let mut result = match strategy {
            Strategy::Full => self.analyze_full(filter, options)?,
            Strategy::Aggregated => {
                let rows = self.store.query_aggregated(filter)?;
                self.analyze_aggregated(rows)
            }
            Strategy::StreamingSampled => {
                self.analyze_streaming(filter, options, &config, started)?
            }
        };

        result.processing_ms = started.elapsed().as_millis() as u64;
        result.timestamp = Utc::now();
        result.applied_filters = filter.clone();

        if let Some(key) = cache_key {
            lock(&self.cache).insert(key, Arc::new(result.clone()));
        }
        Ok(result)
    }

    /// Re-derive one session from its stable `<client_ip>:<micros>` id.
    pub fn get_session(&self, session_id: &str) -> Result<Session, AnalysisError> {
        let (client_ip, start_micros) =
            session_id
                .rsplit_once(':')
                .ok_or_else(|| AnalysisError::InvalidSessionId {
                    session_id: session_id.to_string(),
                })?;
        if start_micros.parse::<i64>().is_err() {
            return Err(AnalysisError::InvalidSessionId {
                session_id: session_id.to_string(),
            });
        }

        let filter = FilterCriteria {
            client_ips: vec![client_ip.to_string()],
            ..FilterCriteria::default()
        };
        let records = self.store.query(&filter)?;
        self.reconstructor
            .reconstruct(&records)
            .into_iter()
            .find(|s| s.session_id == session_id)
            .ok_or_else(|| AnalysisError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Other discovered patterns ranked by Jaccard similarity over
    /// endpoint sets.
    pub fn similar_patterns(
        &self,
        pattern_id: &str,
        filter: Option<&FilterCriteria>,
    ) -> Result<Vec<(WorkflowPattern, f64)>, AnalysisError> {
        let filter = filter.cloned().unwrap_or_default();
        let result = self.analyze(&filter, &AnalyzeOptions::default())?;

        let target = result
            .analysis
            .patterns
            .iter()
            .find(|p| p.pattern_id == pattern_id)
            .cloned()
            .ok_or_else(|| AnalysisError::PatternNotFound {
                pattern_id: pattern_id.to_string(),
            })?;

        let mut similar: Vec<(WorkflowPattern, f64)> = result
            .analysis
            .patterns
            .into_iter()
            .filter(|p| p.pattern_id != pattern_id)
            .map(|p| {
                let similarity = pattern_similarity(&target, &p);
                (p, similarity)
            })
            .filter(|(_, similarity)| *similarity > 0.0)
            .collect();
        similar.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(similar)
    }

    pub fn clear_cache(&self) {
        lock(&self.cache).invalidate_all();
    }

    /// Hot-swap analysis tunables; the result cache is rebuilt because
    /// capacity/TTL may have changed.
    pub fn update_config(&self, patch: &AnalysisConfigPatch) {
        let mut config = lock(&self.config);
        config.apply(patch);
        *lock(&self.cache) = build_cache(&config);
    }

    // ─── Full path ───────────────────────────────────────────────────────

    fn analyze_full(
        &self,
        filter: &FilterCriteria,
        options: &AnalyzeOptions,
    ) -> Result<AnalysisResult, AnalysisError> {
        let records = self.store.query(filter)?;
        let records: Vec<LogRecord> = records
            .into_iter()
            .filter(|r| passes_workflow_filter(r, options, &self.normalizer))
            .collect();

        let sessions = self.reconstructor.reconstruct(&records);
        let analysis = self.discoverer.analyze_workflows(&sessions);
        let summary = generate_summary(&sessions, &analysis);
        Ok(assemble_result(sessions, analysis, summary))
    }

    // ─── Aggregated fast path ────────────────────────────────────────────

    /// Approximate the workflow picture from hourly summaries: one
    /// synthetic entry→exit pattern per domain. No sessions.
    fn analyze_aggregated(&self, rows: Vec<HourlySummary>) -> AnalysisResult {
        struct DomainAcc {
            requests: u64,
            errors: u64,
            weighted_ms: f64,
            clients: u64,
        }

        let mut domains: std::collections::BTreeMap<String, DomainAcc> =
            std::collections::BTreeMap::new();
        for row in &rows {
            let avg_ms = (row.avg_request_processing_time
                + row.avg_target_processing_time
                + row.avg_response_processing_time)
                * 1000.0;
            let acc = domains
                .entry(row.domain_name.clone())
                .or_insert(DomainAcc {
                    requests: 0,
                    errors: 0,
                    weighted_ms: 0.0,
                    clients: 0,
                });
            acc.requests += row.request_count;
            acc.errors += row.error_count;
            acc.weighted_ms += avg_ms * row.request_count as f64;
            acc.clients += row.unique_clients;
        }

        let mut patterns: Vec<WorkflowPattern> = domains
            .iter()
            .filter(|(_, acc)| acc.requests > 0)
            .map(|(domain, acc)| WorkflowPattern {
                pattern_id: format!("aggregated-{domain}"),
                endpoints: vec![format!("entry_{domain}"), format!("exit_{domain}")],
                frequency: acc.requests,
                session_support: acc.requests,
                avg_duration_ms: acc.weighted_ms / acc.requests as f64,
                success_rate: 1.0 - acc.errors as f64 / acc.requests as f64,
                user_agent_breakdown: Default::default(),
            })
            .collect();
        patterns.sort_by(|a, b| b.frequency.cmp(&a.frequency));

        let total_requests: u64 = domains.values().map(|a| a.requests).sum();
        let unique_clients: u64 = domains.values().map(|a| a.clients).sum();

        let entry_points = patterns
            .iter()
            .map(|p| EndpointCount {
                endpoint: p.endpoints[0].clone(),
                count: p.frequency,
            })
            .collect();
        let exit_points = patterns
            .iter()
            .map(|p| EndpointCount {
                endpoint: p.endpoints[1].clone(),
                count: p.frequency,
            })
            .collect();

        let funnels = patterns
            .iter()
            .take(5)
            .map(|p| ConversionFunnel {
                name: format!("Funnel: {}", p.endpoints.join(" -> ")),
                steps: p.endpoints.clone(),
                conversion_rate: p.success_rate,
            })
            .collect();

        let summary = AnalysisSummary {
            total_sessions: 0,
            total_requests,
            unique_clients,
            avg_session_duration_ms: 0.0,
            insights: vec![Insight {
                kind: InsightKind::AggregatedAnalysis,
                title: "Analysis Based on Aggregated Data".to_string(),
                description: format!(
                    "Synthesised from {} hourly summary rows covering {} requests; \
                     individual sessions were not reconstructed",
                    rows.len(),
                    total_requests
                ),
                severity: Severity::Info,
            }],
            funnels,
        };

        let analysis = WorkflowAnalysis {
            patterns,
            transitions: Default::default(),
            entry_points,
            exit_points,
            drop_off_points: Vec::new(),
        };
        assemble_result(Vec::new(), analysis, summary)
    }

    // ─── Streaming-sampled path ──────────────────────────────────────────

    fn analyze_streaming(
        &self,
        filter: &FilterCriteria,
        options: &AnalyzeOptions,
        config: &AnalysisConfig,
        started: Instant,
    ) -> Result<AnalysisResult, AnalysisError> {
        let budget = Duration::from_millis(config.max_processing_time_ms);
        let sampling = if config.use_sampling {
            config.sampling_rate.clamp(0.0, 1.0)
        } else {
            1.0
        };

        let mut rng = rand::rng();
        let mut accumulated: Vec<LogRecord> = Vec::new();
        let mut scanned = 0u64;
        let mut timed_out = false;

        self.store.query_stream(
            filter,
            config.streaming_batch_size.max(1),
            &mut |batch| {
                scanned += batch.len() as u64;
                for record in batch {
                    if (sampling >= 1.0 || rng.random::<f64>() < sampling)
                        && passes_workflow_filter(&record, options, &self.normalizer)
                    {
                        accumulated.push(record);
                    }
                }
                if let Some(callback) = lock(&self.progress_callback).as_ref() {
                    callback(scanned);
                }
                if started.elapsed() >= budget {
                    timed_out = true;
                    return Ok(false);
                }
                Ok(true)
            },
        )?;

        let mut sessions = Vec::new();
        for chunk in accumulated.chunks(SESSION_CHUNK) {
            sessions.extend(self.reconstructor.reconstruct(chunk));
        }

        let analysis = self.discoverer.analyze_workflows(&sessions);
        let mut summary = generate_summary(&sessions, &analysis);

        let mut description = format!(
            "Results computed from a {:.1}% sample of {scanned} scanned records \
             ({} kept)",
            sampling * 100.0,
            accumulated.len()
        );
        if timed_out {
            description.push_str("; partial: processing time budget exceeded");
        }
        summary.insights.insert(
            0,
            Insight {
                kind: InsightKind::SampledAnalysis,
                title: "Sampled Analysis".to_string(),
                description,
                severity: Severity::Info,
            },
        );

        sessions.truncate(MAX_RETURNED_SESSIONS);
        Ok(assemble_result(sessions, analysis, summary))
    }
}

fn assemble_result(
    sessions: Vec<Session>,
    analysis: WorkflowAnalysis,
    summary: AnalysisSummary,
) -> AnalysisResult {
    AnalysisResult {
        sessions,
        analysis,
        summary,
        processing_ms: 0,
        timestamp: Utc::now(),
        applied_filters: FilterCriteria::default(),
    }
}

fn build_cache(config: &AnalysisConfig) -> Cache<String, Arc<AnalysisResult>> {
    Cache::builder()
        .max_capacity(config.max_cached_results)
        .time_to_live(Duration::from_millis(config.cache_expiry_ms.max(1)))
        .build()
}

fn make_cache_key(filter: &FilterCriteria, options: &AnalyzeOptions) -> String {
    serde_json::to_string(&(filter, options))
        .unwrap_or_else(|_| format!("{filter:?}|{options:?}"))
}

/// Include/exclude endpoints match as substrings of the raw or the
/// normalised URL; user-agent excludes are case-insensitive substrings.
fn passes_workflow_filter(
    record: &LogRecord,
    options: &AnalyzeOptions,
    normalizer: &UrlNormalizer,
) -> bool {
    if options.include_endpoints.is_empty()
        && options.exclude_endpoints.is_empty()
        && options.exclude_user_agent_patterns.is_empty()
    {
        return true;
    }

    let raw = record.request_url.as_str();
    let normalized = normalizer.normalize(raw);
    let url_matches = |needle: &str| raw.contains(needle) || normalized.contains(needle);

    if !options.include_endpoints.is_empty()
        && !options.include_endpoints.iter().any(|e| url_matches(e))
    {
        return false;
    }
    if options.exclude_endpoints.iter().any(|e| url_matches(e)) {
        return false;
    }
    if !options.exclude_user_agent_patterns.is_empty() {
        let user_agent = record.user_agent.to_ascii_lowercase();
        if options
            .exclude_user_agent_patterns
            .iter()
            .any(|p| user_agent.contains(&p.to_ascii_lowercase()))
        {
            return false;
        }
    }
    true
}

/// Poison-tolerant lock helper: analysis state stays usable even if a
/// callback panicked while holding a guard.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
