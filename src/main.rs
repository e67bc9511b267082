mod app;
mod args;
mod session;

use anyhow::Result;
use app::App;
use args::{AnalyzeArgs, Command, N170Args, PresentArgs};
use clap::Parser;
use log::info;
use n170_analysis::{DatasetFetcher, HttpFetcher};
use session::Session;

fn main() -> Result<()> {
    env_logger::init();
    let args = N170Args::parse();

    match args.command {
        Command::Present(present) => run_present(present),
        Command::Analyze(analyze) => run_analyze(analyze),
    }
}

fn run_present(args: PresentArgs) -> Result<()> {
    let config = args.experiment_config()?;
    let mut session = Session::prepare(config)?;

    let session = if args.headless {
        session.run_headless(args.width, args.height)?;
        session
    } else {
        App::new(session, args.font.clone()).run()?
    };
    session.finish(args.records.as_deref())?;
    Ok(())
}

fn run_analyze(args: AnalyzeArgs) -> Result<()> {
    let config = args.analysis_config()?;
    let fetcher = config.dataset_url.clone().map(HttpFetcher::new);
    let report = n170_analysis::run(&config, fetcher.as_ref().map(|f| f as &dyn DatasetFetcher))?;

    info!(
        "{} events, {} epochs kept ({:.1}% dropped)",
        report.n_events, report.n_epochs, report.drop_percentage
    );
    for evoked in &report.evoked {
        info!("{}: {} epochs averaged", evoked.condition, evoked.nave);
    }
    for (condition, model) in &report.models {
        info!(
            "{condition}: offset {:.3}, exponent {:.3}, {} peaks, r2 {:.3}, error {:.4}",
            model.offset(),
            model.exponent(),
            model.peak_params.len(),
            model.r_squared,
            model.error
        );
    }
    for figure in &report.figures {
        info!("wrote {}", figure.display());
    }
    Ok(())
}
