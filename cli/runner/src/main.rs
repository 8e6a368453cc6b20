//! shardflow CLI
//!
//! Resumable batch classifier for sharded parquet corpora.

use clap::Parser;

mod args;
mod run;

use args::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    run::init_logging(args.log_level)?;

    let stats_json = args.stats_json;
    let snapshot = run::execute(args).await?;

    if stats_json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    // Summary to stderr so stdout stays machine-readable.
    eprintln!();
    eprintln!("Run completed:");
    eprintln!("  Shards completed: {}", snapshot.shards_completed);
    eprintln!("  Shards skipped:   {}", snapshot.shards_skipped);
    if snapshot.shards_stalled > 0 {
        eprintln!("  Shards stalled:   {}", snapshot.shards_stalled);
    }
    if snapshot.shards_corrupt > 0 {
        eprintln!("  Shards corrupt:   {}", snapshot.shards_corrupt);
    }
    eprintln!(
        "  Records classified: {}",
        format_number(snapshot.records_classified)
    );
    eprintln!(
        "  Records failed:     {}",
        format_number(snapshot.records_failed)
    );
    eprintln!("  Predict attempts:   {}", snapshot.predict_attempts);
    if snapshot.retries > 0 {
        eprintln!("  Retries:            {}", snapshot.retries);
    }
    eprintln!("  Duration:           {:.2}s", snapshot.elapsed_secs);
    if snapshot.records_per_sec > 0.0 {
        eprintln!("  Throughput:         {:.1} records/sec", snapshot.records_per_sec);
    }

    if snapshot.has_failures() {
        std::process::exit(4); // Partial failure
    }

    Ok(())
}

/// Format a large number with commas.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    let mut count = 0;

    for c in s.chars().rev() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(c);
        count += 1;
    }

    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }
}
