//! `simulate` — offline comparison bench for the four C2 policy-search
//! strategies (heuristic / exhaustive / hill-climb / simulated-annealing)
//! across a handful of canned queueing scenarios. Prints a table and
//! optionally writes a CSV, one row per (scenario, strategy).

mod metrics;
mod scenario;

use std::fs::File;
use std::io::BufWriter;
use std::time::Instant;

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;

use reservectl::model::Reserves;
use reservectl::search::{Exhaustive, Heuristic, HillClimbing, SimulatedAnnealing};

use metrics::{print_table, write_csv, RunSummary};
use scenario::Scenario;

#[derive(Parser, Debug)]
#[command(author, version, about = "Compares reserve-capacity policy-search strategies across canned scenarios")]
struct Args {
    /// Scenarios to run (comma-separated names, or "all")
    #[arg(short, long, default_value = "all")]
    scenarios: String,

    /// Strategies to run (comma-separated: heuristic,exhaustive,hill-climb,annealing; or "all")
    #[arg(long, default_value = "all")]
    strategies: String,

    /// Output CSV file
    #[arg(short, long)]
    output: Option<String>,

    /// Quiet mode (only emit the CSV, if requested)
    #[arg(short, long)]
    quiet: bool,
}

const ALL_STRATEGIES: &[&str] = &["heuristic", "exhaustive", "hill-climb", "annealing"];

fn parse_scenarios(s: &str) -> Vec<Scenario> {
    if s == "all" {
        return Scenario::all();
    }
    s.split(',').filter_map(|name| Scenario::from_name(name.trim())).collect()
}

fn parse_strategies(s: &str) -> Vec<String> {
    if s == "all" {
        return ALL_STRATEGIES.iter().map(|s| s.to_string()).collect();
    }
    s.split(',').map(|s| s.trim().to_string()).collect()
}

fn run_strategy(name: &str, scenario: &Scenario) -> Option<RunSummary> {
    let load = scenario.load();
    let costs = scenario.costs();
    let start = Instant::now();

    let solution = match name {
        "heuristic" => {
            let h = Heuristic::new(scenario.n, scenario.nu, costs, scenario.cores);
            h.heuristic(load).ok()
        }
        "exhaustive" => {
            let ex = Exhaustive::new(scenario.n, scenario.nu, costs);
            ex.search(load).ok()
        }
        "hill-climb" => {
            let hc = HillClimbing::new(scenario.n, scenario.nu, costs);
            hc.climb(Reserves::new(0, 0, 0), load).ok()
        }
        "annealing" => {
            let sa = SimulatedAnnealing::new(scenario.n, scenario.nu, costs, scenario.cores);
            let mut rng = StdRng::seed_from_u64(42);
            sa.search(load, None, &mut rng).ok()
        }
        other => {
            eprintln!("unknown strategy: {other}");
            None
        }
    }?;

    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    Some(RunSummary {
        scenario: scenario.name.to_string(),
        strategy: name.to_string(),
        m: solution.reserves.m,
        d: solution.reserves.d,
        u: solution.reserves.u,
        cost: solution.cost,
        elapsed_ms,
    })
}

fn main() {
    let args = Args::parse();

    let scenarios = parse_scenarios(&args.scenarios);
    let strategies = parse_strategies(&args.strategies);

    if !args.quiet {
        println!("Reserve-capacity policy-search comparison");
        println!("==========================================");
        println!("Scenarios: {:?}", scenarios.iter().map(|s| s.name).collect::<Vec<_>>());
        println!("Strategies: {:?}", strategies);
        println!();
    }

    let mut summaries = Vec::new();
    for scenario in &scenarios {
        for strategy in &strategies {
            match run_strategy(strategy, scenario) {
                Some(summary) => summaries.push(summary),
                None => eprintln!("{} / {}: search failed, skipping", scenario.name, strategy),
            }
        }
    }

    if !args.quiet {
        print_table(&summaries);
    }

    if let Some(output_path) = &args.output {
        let file = File::create(output_path).expect("failed to create output file");
        let mut writer = BufWriter::new(file);
        write_csv(&mut writer, &summaries).expect("failed to write CSV");
        if !args.quiet {
            println!("Results written to: {}", output_path);
        }
    }
}
