#![allow(dead_code)]

use stationhub::application::coordinator::Coordinator;
use stationhub::broadcast::Broadcaster;
use stationhub::config::{BroadcastConfig, RetryPolicy};
use stationhub::domain::ports::LedgerBox;
use stationhub::infrastructure::in_memory::InMemoryLedger;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;

pub fn coordinator_with(ledger: LedgerBox, retry: RetryPolicy) -> Arc<Coordinator> {
    Arc::new(Coordinator::new(
        ledger,
        Broadcaster::spawn(&BroadcastConfig::default()),
        retry,
    ))
}

pub fn in_memory_coordinator() -> Arc<Coordinator> {
    coordinator_with(Arc::new(InMemoryLedger::new()), RetryPolicy::default())
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
    }
}

/// Writes a roster with `rows` students, ids `G0001..`, each owing 10.
pub fn generate_roster(path: &Path, rows: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(["student_id", "name", "balance", "yearbook"])?;
    for i in 1..=rows {
        wtr.write_record([
            format!("G{i:04}"),
            format!("Generated {i}"),
            "10".to_string(),
            "yes".to_string(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
