//! Leave-one-out retrieval evaluation.
//!
//! Each query is an item of known diagnosis. Its `k` nearest neighbors (with
//! the item itself excluded) are retrieved and a neighbor counts as correct
//! when it shares the query's diagnosis. The report aggregates precision@k,
//! how often at least N neighbors were correct, and the same numbers per
//! diagnosis. A binary breakdown treats every diagnosis other than the
//! configured positive label as one class.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EvaluationConfig;
use crate::error::{SearchError, SearchResult};
use crate::similarity::SimilarityService;
use crate::vector::ItemId;

/// One evaluation query: a reference item id and a freshly computed embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalQuery {
    #[serde(rename = "image_id")]
    pub id: ItemId,
    pub embedding: Vec<f32>,
}

/// Aggregated metrics for a group of queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStats {
    pub count: usize,
    pub mean_precision: f64,
    /// Threshold -> percentage of queries with at least that many correct
    pub at_least_pct: BTreeMap<usize, f64>,
    pub zero_matches_pct: f64,
}

/// Full evaluation result.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub k: usize,
    pub processed: usize,
    /// Queries without a known diagnosis
    pub skipped: Vec<ItemId>,
    /// Queries that got fewer than `k` neighbors back
    pub short_results: Vec<ItemId>,
    pub overall: GroupStats,
    pub by_diagnosis: BTreeMap<String, GroupStats>,
    pub positive_label: String,
    /// Queries whose diagnosis is not the positive label, scored binary
    pub negative_group: Option<GroupStats>,
}

/// Correct-match counts collected for one group.
#[derive(Debug, Default)]
struct Tally {
    correct: Vec<usize>,
}

impl Tally {
    fn push(&mut self, correct: usize) {
        self.correct.push(correct);
    }

    fn finish(&self, k: usize, thresholds: &[usize]) -> GroupStats {
        let count = self.correct.len();
        let pct = |n: usize| {
            if count == 0 {
                0.0
            } else {
                n as f64 / count as f64 * 100.0
            }
        };

        let mean_precision = if count == 0 || k == 0 {
            0.0
        } else {
            self.correct.iter().map(|&c| c as f64 / k as f64).sum::<f64>() / count as f64
        };

        let at_least_pct = thresholds
            .iter()
            .map(|&t| (t, pct(self.correct.iter().filter(|&&c| c >= t).count())))
            .collect();

        GroupStats {
            count,
            mean_precision,
            at_least_pct,
            zero_matches_pct: pct(self.correct.iter().filter(|&&c| c == 0).count()),
        }
    }
}

/// Per-query outcome before aggregation.
struct Outcome {
    id: ItemId,
    diagnosis: String,
    retrieved: usize,
    correct: usize,
    /// Present for queries outside the positive class
    binary_correct: Option<usize>,
}

/// Runs leave-one-out evaluation against a [`SimilarityService`].
pub struct Evaluator<'a> {
    service: &'a SimilarityService,
    config: EvaluationConfig,
    k: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(service: &'a SimilarityService, config: EvaluationConfig) -> Self {
        let k = service.default_k();
        Self { service, config, k }
    }

    #[must_use]
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    /// Evaluates every query and aggregates the results.
    ///
    /// # Errors
    /// [`SearchError::IndexNotReady`] when the reference index cannot be
    /// loaded, a store error when ground-truth or neighbor metadata cannot be
    /// fetched, or a malformed-query error for an embedding of the wrong
    /// dimension.
    pub fn evaluate(&self, queries: &[EvalQuery]) -> SearchResult<EvaluationReport> {
        if !self.service.ensure_loaded() {
            return Err(SearchError::IndexNotReady);
        }

        let ids: Vec<ItemId> = queries.iter().map(|q| q.id.clone()).collect();
        let truth = self.service.resolve_metadata(&ids)?;

        let mut skipped = Vec::new();
        let mut labelled = Vec::with_capacity(queries.len());
        for query in queries {
            match truth.get(&query.id).and_then(|m| m.diagnosis.clone()) {
                Some(diagnosis) => labelled.push((query, diagnosis)),
                None => {
                    warn!("No diagnosis found for query {}, skipping", query.id);
                    skipped.push(query.id.clone());
                }
            }
        }

        info!(
            "Evaluating {} queries at k={} ({} skipped)",
            labelled.len(),
            self.k,
            skipped.len()
        );

        let outcomes = labelled
            .par_iter()
            .map(|(query, diagnosis)| self.evaluate_one(query, diagnosis))
            .collect::<SearchResult<Vec<Outcome>>>()?;

        Ok(self.aggregate(outcomes, skipped))
    }

    fn evaluate_one(&self, query: &EvalQuery, diagnosis: &str) -> SearchResult<Outcome> {
        let matches = self
            .service
            .find_similar_strict(&query.embedding, self.k, &query.id)?;

        let correct = matches.iter().filter(|m| m.diagnosis == diagnosis).count();
        let positive = self.config.positive_label.as_str();
        let binary_correct = (diagnosis != positive)
            .then(|| matches.iter().filter(|m| m.diagnosis != positive).count());

        debug!(
            "Query {} ({diagnosis}): {correct}/{} neighbors share the diagnosis",
            query.id, self.k
        );

        Ok(Outcome {
            id: query.id.clone(),
            diagnosis: diagnosis.to_string(),
            retrieved: matches.len(),
            correct,
            binary_correct,
        })
    }

    fn aggregate(&self, outcomes: Vec<Outcome>, skipped: Vec<ItemId>) -> EvaluationReport {
        let thresholds = &self.config.match_thresholds;
        let mut overall = Tally::default();
        let mut negative = Tally::default();
        let mut per_diagnosis: BTreeMap<String, Tally> = BTreeMap::new();
        let mut short_results = Vec::new();

        for outcome in &outcomes {
            overall.push(outcome.correct);
            per_diagnosis
                .entry(outcome.diagnosis.clone())
                .or_default()
                .push(outcome.correct);
            if let Some(binary) = outcome.binary_correct {
                negative.push(binary);
            }
            if outcome.retrieved < self.k {
                short_results.push(outcome.id.clone());
            }
        }

        let negative_group =
            (!negative.correct.is_empty()).then(|| negative.finish(self.k, thresholds));

        EvaluationReport {
            k: self.k,
            processed: outcomes.len(),
            skipped,
            short_results,
            overall: overall.finish(self.k, thresholds),
            by_diagnosis: per_diagnosis
                .into_iter()
                .map(|(dx, tally)| (dx, tally.finish(self.k, thresholds)))
                .collect(),
            positive_label: self.config.positive_label.clone(),
            negative_group,
        }
    }
}

impl EvaluationReport {
    /// Plain-text summary.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let k = self.k;

        let _ = writeln!(out, "--- Evaluation Summary ---");
        let _ = writeln!(out, "Processed {} queries.", self.processed);
        render_group(&mut out, &self.overall, k, "correct diagnoses");
        let _ = writeln!(out, "--------------------------");

        if !self.by_diagnosis.is_empty() {
            let _ = writeln!(out, "\n--- Results by Diagnosis ---");
            for (dx, stats) in &self.by_diagnosis {
                let _ = writeln!(out, "\nDiagnosis: {dx} ({} queries)", stats.count);
                render_group(&mut out, stats, k, "correct diagnoses");
            }
            let _ = writeln!(out, "--------------------------");
        }

        if let Some(stats) = &self.negative_group {
            let _ = writeln!(
                out,
                "\n--- Non-{} Group (any non-{} neighbor counts) ---",
                self.positive_label, self.positive_label
            );
            let _ = writeln!(out, "Queries: {}", stats.count);
            render_group(&mut out, stats, k, "non-positive neighbors");
            let _ = writeln!(out, "--------------------------");
        }

        if !self.short_results.is_empty() {
            let _ = writeln!(out, "\n--- Fewer Than {k} Neighbors ---");
            for id in &self.short_results {
                let _ = writeln!(out, "  - {id}");
            }
        }

        if !self.skipped.is_empty() {
            let _ = writeln!(out, "\n--- Skipped (no diagnosis) ---");
            for id in &self.skipped {
                let _ = writeln!(out, "  - {id}");
            }
        }

        out
    }
}

fn render_group(out: &mut String, stats: &GroupStats, k: usize, what: &str) {
    let _ = writeln!(out, "Average Precision@{k}: {:.4}", stats.mean_precision);
    for (threshold, pct) in &stats.at_least_pct {
        let _ = writeln!(out, "% with at least {threshold}/{k} {what}: {pct:.2}%");
    }
    let _ = writeln!(out, "% with no {what}: {:.2}%", stats.zero_matches_pct);
}
