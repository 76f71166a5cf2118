use anyhow::{Context, Result};
use clap::Parser;
use mapflow::cli::Cli;
use mapflow::flow::{calculate_flow_from_source, FlowOutcome};
use mapflow::optimizer::run_trials;
use mapflow::output::write_outputs;
use mapflow::parser::parse_network_file;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = cli.to_config()?;

    let network = parse_network_file(&cli.network_file)
        .with_context(|| format!("reading network '{}'", cli.network_file.display()))?;

    let (graph, summary) =
        calculate_flow_from_source(&network, &cfg, None).context("calculating flow")?;
    if summary.outcome == FlowOutcome::Diverged {
        eprintln!(
            "Warning: flow calculation did not converge after {} iterations (residual {:.3e})",
            summary.iterations, summary.residual
        );
    }

    let trial = run_trials(&graph, &cfg, None).context("searching for modules")?;

    let written = write_outputs(
        &cfg,
        cli.output_selection(),
        &cli.out_dir,
        &cli.resolved_out_name(),
        &graph,
        &trial,
    )
    .with_context(|| format!("writing results to '{}'", cli.out_dir.display()))?;

    if !cli.silent {
        println!(
            "Partitioned into {} top modules with codelength {:.6} bits ({:.2}% saved over one level)",
            trial.num_modules,
            trial.codelength,
            if trial.one_level_codelength > 0.0 {
                (1.0 - trial.codelength / trial.one_level_codelength) * 100.0
            } else {
                0.0
            }
        );
        for path in written {
            println!("  -> {}", path.display());
        }
    }

    Ok(())
}
