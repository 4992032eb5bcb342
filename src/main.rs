//! Command-line driver: simulate an experiment, run the hierarchical sampler
//! over it, and report posterior means next to the simulated truth.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use shredder::analyze::Analyze;
use shredder::config::AnalyzeConfig;
use shredder::io::PosteriorSummary;
use shredder::simulate::{SimulatedData, Simulation};
use shredder::Result;

#[derive(Parser, Debug)]
#[command(name = "shredder")]
#[command(about = "Hierarchical transcript expression sampling on a simulated experiment")]
#[command(version)]
struct Cli {
    /// TOML run configuration; flags below override it.
    #[arg(short, long, env = "SHREDDER_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    /// Worker threads per sampler group.
    #[arg(short = 't', long)]
    threads: Option<usize>,

    #[arg(long)]
    optimize_rounds: Option<usize>,

    #[arg(long)]
    burnin: Option<usize>,

    /// Sampling iterations, burn-in included.
    #[arg(short = 'n', long)]
    num_samples: Option<usize>,

    /// Keep the hierarchical prior away from the quantifiers.
    #[arg(long)]
    nopriors: bool,

    #[arg(long)]
    no_progress: bool,

    #[arg(long, default_value = "200")]
    transcripts: usize,

    #[arg(long, default_value = "2")]
    conditions: usize,

    #[arg(long, default_value = "3")]
    replicates: usize,

    #[arg(long, default_value = "2")]
    tgroup_size: usize,

    /// Expected fragments per sample.
    #[arg(long, default_value = "1000000")]
    depth: f64,

    /// Number of transcripts to print.
    #[arg(long, default_value = "10")]
    top: usize,

    /// Write every sample to this CSV file.
    #[cfg(feature = "csv")]
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl Cli {
    fn analyze_config(&self) -> Result<AnalyzeConfig> {
        let mut config = match &self.config {
            Some(path) => AnalyzeConfig::from_path(path)?,
            None => AnalyzeConfig::default(),
        };
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if let Some(rounds) = self.optimize_rounds {
            config.optimize_rounds = rounds;
        }
        if let Some(burnin) = self.burnin {
            config.burnin = burnin;
        }
        if let Some(n) = self.num_samples {
            config.num_samples = n;
        }
        config.nopriors |= self.nopriors;
        config.progress &= !self.no_progress;
        config.validate()?;
        Ok(config)
    }

    fn simulation(&self, seed: u64) -> Simulation {
        Simulation {
            num_transcripts: self.transcripts,
            num_conditions: self.conditions,
            replicates: self.replicates,
            tgroup_size: self.tgroup_size,
            depth: self.depth,
            seed,
            ..Simulation::default()
        }
    }
}

fn print_summary(data: &SimulatedData, summary: &PosteriorSummary, top: usize) {
    let experiment = summary.experiment_mean();
    let mut order: Vec<usize> = (0..experiment.dim()).collect();
    order.sort_by(|&a, &b| experiment.mean()[b].total_cmp(&experiment.mean()[a]));

    let sd = experiment.std();
    let names = data.design.condition_names();
    println!("{} posterior samples", summary.count());
    print!("{:>10} {:>12} {:>12}", "transcript", "experiment", "sd");
    for name in names {
        print!(" {:>14} {:>12}", name, "truth");
    }
    println!();
    for &tid in order.iter().take(top) {
        print!(
            "{:>10} {:>12.4e} {:>12.4e}",
            tid,
            experiment.mean()[tid],
            sd[tid]
        );
        for c in 0..names.len() {
            print!(
                " {:>14.4e} {:>12.4e}",
                summary.condition_mean(c).mean()[tid],
                data.condition_mean[[c, tid]]
            );
        }
        println!();
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = cli.analyze_config()?;
    let data = cli.simulation(config.seed).generate()?;
    info!(
        transcripts = data.design.num_transcripts(),
        samples = data.design.num_samples(),
        spliced_tgroups = data.design.num_spliced(),
        "simulated experiment"
    );

    let quantifiers = data.quantifiers(config.seed);
    let mut summary = PosteriorSummary::new(&data.design);
    let mut analyze = Analyze::new(config, data.design.clone(), quantifiers)?;

    #[cfg(feature = "csv")]
    if let Some(path) = &cli.output {
        let mut csv = shredder::io::csv::CsvSink::from_path(path)?;
        analyze.run(&mut (&mut summary, &mut csv))?;
        csv.flush()?;
        info!(path = %path.display(), "wrote samples");
        print_summary(&data, &summary, cli.top);
        return analyze.shutdown();
    }

    analyze.run(&mut summary)?;
    print_summary(&data, &summary, cli.top);
    analyze.shutdown()
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "run failed");
            ExitCode::FAILURE
        }
    }
}
