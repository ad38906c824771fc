use std::sync::Arc;

use channel_engine::ChannelRegistry;
use harness_api::{BackpressurePolicy, now_ms};
use harness_core::{Harness, RunOutcome, RunRequest};

use crate::config::{HarnessConfig, RunArgs};
use crate::error::ServerError;

pub async fn run(args: RunArgs) -> Result<(), ServerError> {
    let config = HarnessConfig::load(&args.config)?;
    let registry = Arc::new(ChannelRegistry::with_faults(config.faults.clone()));
    let harness = Harness::new(registry.clone(), registry, config.settings());

    // Один seed на все прогоны: в --compare обе policy получают одинаковый workload.
    let seed = args.seed.unwrap_or_else(now_ms);
    let modes = if args.compare {
        vec![BackpressurePolicy::AwaitEach, BackpressurePolicy::FireAndForget]
    } else {
        vec![args.mode]
    };

    for mode in modes {
        let channel_id = if args.compare {
            format!("{}-{mode}", args.channel_id)
        } else {
            args.channel_id.clone()
        };
        let request = RunRequest {
            channel_id,
            count: args.count,
            min_size: args.min_size,
            max_size: args.max_size,
            backpressure_mode: mode,
            seed: Some(seed),
            timeout_ms: args.timeout_ms,
            delay_ms: args.delay_ms,
        };
        let outcome = harness.run(&request).await?;

        if args.json {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        } else {
            print_summary(&outcome, seed);
        }
    }
    Ok(())
}

fn print_summary(outcome: &RunOutcome, seed: i64) {
    let report = &outcome.report;
    let v = &outcome.verification;
    let verdict = if v.is_clean() { "CLEAN" } else { "ANOMALIES" };

    println!("Run {} ({})", report.channel_id, report.policy);
    println!("  seed      : {seed}");
    println!("  messages  : {} (+ completion marker)", report.manifest.count());
    println!(
        "  emit      : total {:.1} ms | avg {:.3} | min {:.3} | max {:.3} | p95 {:.3} ms",
        report.total_ms,
        report.emit_stats.mean,
        report.emit_stats.min,
        report.emit_stats.max,
        report.emit_stats.p95,
    );
    println!("  failures  : {}", report.failures.len());
    for f in &report.failures {
        println!("    #{} {}", f.sequence_id, f.error);
    }
    println!(
        "  received  : {}/{}{}",
        v.received_count,
        v.expected_count,
        if outcome.timed_out { " (timed out)" } else { "" }
    );
    if let Some(err) = &outcome.subscribe_error {
        println!("  subscribe : {err}");
    }
    match v.first_out_of_order_index {
        Some(idx) => println!("  order     : broken at arrival #{idx}"),
        None => println!("  order     : ok"),
    }
    println!("  missing   : {:?}", v.missing);
    println!("  duplicates: {:?} ({} extra)", v.duplicates, v.duplicate_count);
    if !v.unexpected.is_empty() {
        println!("  unexpected: {:?}", v.unexpected);
    }
    println!("  mismatches: {}", v.mismatches.len());
    println!(
        "  lag       : avg {:.1} | p50 {:.1} | p95 {:.1} | p99 {:.1} ms",
        v.lag.mean, v.lag.p50, v.lag.p95, v.lag.p99,
    );
    println!("  verdict   : {verdict}");
    println!();
}
