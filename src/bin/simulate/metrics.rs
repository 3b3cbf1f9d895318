//! Comparison-table recording for the policy-search bench: one row per
//! (scenario, strategy) run.

use std::io::Write;

/// Outcome of running one strategy against one scenario.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub scenario: String,
    pub strategy: String,
    pub m: u32,
    pub d: u32,
    pub u: u32,
    pub cost: f64,
    pub elapsed_ms: f64,
}

impl RunSummary {
    pub fn csv_header() -> &'static str {
        "scenario,strategy,m,d,u,cost,elapsed_ms"
    }

    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{:.6},{:.3}",
            self.scenario, self.strategy, self.m, self.d, self.u, self.cost, self.elapsed_ms
        )
    }
}

pub fn write_csv<W: Write>(writer: &mut W, summaries: &[RunSummary]) -> std::io::Result<()> {
    writeln!(writer, "{}", RunSummary::csv_header())?;
    for summary in summaries {
        writeln!(writer, "{}", summary.to_csv_row())?;
    }
    Ok(())
}

/// Prints a comparison table grouped by scenario, cheapest strategy first.
pub fn print_table(summaries: &[RunSummary]) {
    let mut scenarios: Vec<&str> = summaries.iter().map(|s| s.scenario.as_str()).collect();
    scenarios.sort();
    scenarios.dedup();

    for scenario in scenarios {
        let mut rows: Vec<&RunSummary> = summaries.iter().filter(|s| s.scenario == scenario).collect();
        rows.sort_by(|a, b| a.cost.partial_cmp(&b.cost).unwrap_or(std::cmp::Ordering::Equal));

        println!("\n{}", "=".repeat(72));
        println!("Scenario: {}", scenario);
        println!("{}", "=".repeat(72));
        println!(
            "{:<20} {:>6} {:>6} {:>6} {:>12} {:>10}",
            "Strategy", "m", "D", "U", "cost", "elapsed ms"
        );
        println!("{}", "-".repeat(72));
        for s in rows {
            println!(
                "{:<20} {:>6} {:>6} {:>6} {:>12.4} {:>10.3}",
                s.strategy, s.m, s.d, s.u, s.cost, s.elapsed_ms
            );
        }
    }
    println!();
}
