/// Header matching [`AggregateReport::csv_row`]
pub const CSV_HEADER: &str = "pes,min,avg,max";

/// Elapsed time statistics across every PE of a run, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregateReport {
    pub pes: usize,
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

impl AggregateReport {
    /// `None` for an empty set of samples
    pub fn from_elapsed(elapsed_ms: &[f64]) -> Option<AggregateReport> {
        let first = *elapsed_ms.first()?;
        let (min, max, sum) = elapsed_ms
            .iter()
            .fold((first, first, 0.0), |(min, max, sum), &v| {
                (min.min(v), max.max(v), sum + v)
            });
        Some(AggregateReport {
            pes: elapsed_ms.len(),
            min,
            avg: sum / elapsed_ms.len() as f64,
            max,
        })
    }

    pub fn csv_row(&self) -> String {
        format!("{},{:.3},{:.3},{:.3}", self.pes, self.min, self.avg, self.max)
    }
}

impl std::fmt::Display for AggregateReport {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Aggregated ELAPSED_MS across {} PEs: min={:.3} ms  avg={:.3} ms  max={:.3} ms",
            self.pes, self.min, self.avg, self.max
        )
    }
}
