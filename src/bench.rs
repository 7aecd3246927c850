//! Latency and cost benchmark over a question set.
//!
//! `grag bench <questions.jsonl>` drives [`QueryPipeline::run`] directly,
//! at most `concurrency` requests in flight, and reports p50/p95 latency
//! together with the summed cost estimate.
//!
//! The questions file holds one JSON object per line with a `question`
//! field. Other fields (e.g. reference answers) are ignored, and blank
//! lines are skipped.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::pipeline::{PipelineOutcome, QueryPipeline};
use crate::store::SqliteStore;

#[derive(Debug, Deserialize)]
struct QuestionLine {
    question: String,
}

/// Aggregate results of one benchmark run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BenchReport {
    pub requests: usize,
    pub answered: usize,
    pub rejected_topic: usize,
    pub rejected_citation: usize,
    pub errors: usize,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub total_cost: f64,
}

/// Read the `question` field of every non-blank JSONL line.
pub fn load_questions(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read questions file: {}", path.display()))?;
    parse_questions(&content)
}

fn parse_questions(content: &str) -> Result<Vec<String>> {
    let mut questions = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed: QuestionLine = serde_json::from_str(line)
            .with_context(|| format!("Invalid question on line {}", lineno + 1))?;
        questions.push(parsed.question);
    }
    if questions.is_empty() {
        bail!("Questions file contains no questions");
    }
    Ok(questions)
}

/// Nearest-rank percentile over sorted samples: index `floor(q * n)`,
/// clamped to the last sample.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (q * sorted.len() as f64).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Issue `requests` questions, cycling through `questions` in order.
///
/// Failed requests are counted as errors and their latency is still
/// sampled.
pub async fn run_bench(
    pipeline: Arc<QueryPipeline>,
    questions: &[String],
    requests: usize,
    concurrency: usize,
) -> Result<BenchReport> {
    if questions.is_empty() {
        bail!("No questions to benchmark");
    }

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles = Vec::with_capacity(requests);

    for i in 0..requests {
        let question = questions[i % questions.len()].clone();
        let pipeline = Arc::clone(&pipeline);
        let sem = Arc::clone(&semaphore);

        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire_owned().await?;
            let started = Instant::now();
            let result = pipeline.run(&question, None).await;
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
            anyhow::Ok((latency_ms, result))
        }));
    }

    let mut report = BenchReport {
        requests,
        ..BenchReport::default()
    };
    let mut latencies = Vec::with_capacity(requests);

    for handle in handles {
        let (latency_ms, result) = handle.await??;
        latencies.push(latency_ms);
        match result {
            Ok(result) => {
                report.total_cost += result.response.cost;
                match result.outcome {
                    PipelineOutcome::Answered => report.answered += 1,
                    PipelineOutcome::RejectedByTopic => report.rejected_topic += 1,
                    PipelineOutcome::RejectedByCitation => report.rejected_citation += 1,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "benchmark request failed");
                report.errors += 1;
            }
        }
    }

    latencies.sort_by(|a, b| a.total_cmp(b));
    report.p50_ms = percentile(&latencies, 0.5);
    report.p95_ms = percentile(&latencies, 0.95);
    Ok(report)
}

/// `grag bench <questions>`: benchmark against the configured database.
pub async fn run_bench_cmd(
    config: &Config,
    questions_path: &Path,
    requests: Option<usize>,
    concurrency: usize,
) -> Result<()> {
    let questions = load_questions(questions_path)?;

    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool.clone()));
    let pipeline = Arc::new(QueryPipeline::from_config(config, store).await?);

    let requests = requests.unwrap_or(questions.len());
    let settings = pipeline.settings();
    println!(
        "bench {} ({} requests, concurrency {}, top_k {}, context_k {})",
        questions_path.display(),
        requests,
        concurrency,
        settings.top_k,
        settings.context_k
    );

    let report = run_bench(pipeline, &questions, requests, concurrency).await?;

    println!("  answered: {}", report.answered);
    println!("  rejected (topic): {}", report.rejected_topic);
    println!("  rejected (citations): {}", report.rejected_citation);
    println!("  errors: {}", report.errors);
    println!("  p50 latency: {:.1} ms", report.p50_ms);
    println!("  p95 latency: {:.1} ms", report.p95_ms);
    println!("  estimated cost: ${:.6}", report.total_cost);

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_questions_skips_blank_lines_and_extra_fields() {
        let content = r#"{"question": "How do I reset my VPN token?", "ground_truths": ["portal"]}

{"question": "Who approves leave?"}
"#;
        assert_eq!(
            parse_questions(content).unwrap(),
            vec!["How do I reset my VPN token?", "Who approves leave?"]
        );
    }

    #[test]
    fn test_parse_questions_reports_line() {
        let err = parse_questions("{\"question\": \"ok\"}\nnot json\n").unwrap_err();
        assert!(format!("{err:#}").contains("line 2"), "{err:#}");
        assert!(parse_questions("\n\n").is_err());
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let samples: Vec<f64> = (1..=20).map(f64::from).collect();
        assert_eq!(percentile(&samples, 0.5), 11.0);
        assert_eq!(percentile(&samples, 0.95), 20.0);
        assert_eq!(percentile(&[4.0], 0.95), 4.0);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }
}
