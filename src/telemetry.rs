use crate::db::schema::RateTable;

/// Telemetry events sent from the batch writer to the progress tracker
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    /// Row counts are final (after duplicate collapsing); writing begins
    WriteStarted { rates: u64, bonus_rates: u64 },
    /// One INSERT statement succeeded
    BatchWritten {
        table: RateTable,
        rows: u64,
        duration_ms: u64,
    },
    Committed,
    RolledBack,
}

/// Statistics aggregated from telemetry events
#[derive(Debug, Default, Clone)]
pub struct ProgressStats {
    pub rates_total: u64,
    pub bonus_rates_total: u64,
    pub rates_written: u64,
    pub bonus_rates_written: u64,
    pub batches_written: u64,
    pub committed: bool,
    pub rolled_back: bool,
    pub batch_durations_ms: Vec<u64>,
}

impl ProgressStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats with a telemetry event
    pub fn update(&mut self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::WriteStarted { rates, bonus_rates } => {
                self.rates_total = *rates;
                self.bonus_rates_total = *bonus_rates;
            }
            TelemetryEvent::BatchWritten {
                table,
                rows,
                duration_ms,
            } => {
                match table {
                    RateTable::Rates => self.rates_written += rows,
                    RateTable::BonusRates => self.bonus_rates_written += rows,
                }
                self.batches_written += 1;
                self.batch_durations_ms.push(*duration_ms);
            }
            TelemetryEvent::Committed => self.committed = true,
            TelemetryEvent::RolledBack => self.rolled_back = true,
        }
    }

    /// Calculate percentile from batch durations
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.batch_durations_ms.is_empty() {
            return None;
        }

        let mut sorted = self.batch_durations_ms.clone();
        sorted.sort_unstable();

        let index = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        let index = index.saturating_sub(1).min(sorted.len() - 1);

        Some(sorted[index])
    }

    /// Get p50, p90, p99 percentiles
    pub fn get_percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        (
            self.percentile(50.0),
            self.percentile(90.0),
            self.percentile(99.0),
        )
    }
}
