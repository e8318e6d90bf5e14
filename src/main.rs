use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use petrowatt::analysis::aggregation::aggregate;
use petrowatt::analysis::reporting::print_run_summary;
use petrowatt::cli::cli::Args;
use petrowatt::core::evaluator::Evaluator;
use petrowatt::data::facility_loader::load_facility;
use petrowatt::utils::csv_export::export_results;
use petrowatt::utils::logging;

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init_logging(args.enable_timing(), args.debug_logging());

    println!("petrowatt facility energy calculator");

    // Exit codes: 1 configuration rejected, 2 resource missing or broken,
    // 3 internal solver failure
    let model = match load_facility(Path::new(args.config())) {
        Ok(model) => model,
        Err(error) => {
            eprintln!("{}", error);
            return ExitCode::from(error.exit_code() as u8);
        }
    };

    let period_count = match model.time_vector() {
        Ok(time_vector) => time_vector.period_count(),
        Err(error) => {
            eprintln!("{}", error);
            return ExitCode::from(1);
        }
    };
    println!(
        "Evaluating '{}': {} installations over {} periods",
        model.name,
        model.installations.len(),
        period_count
    );

    let progress = if args.progress() {
        let bar = ProgressBar::new(period_count as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} periods")
                .expect("static template parses")
                .progress_chars("=> "),
        );
        Some(bar)
    } else {
        None
    };

    let evaluator = Evaluator::new(&model);
    let tick = || {
        if let Some(bar) = &progress {
            bar.inc(1);
        }
    };
    let results = match evaluator.evaluate_with_progress(args.parallel(), &tick) {
        Ok(results) => results,
        Err(error) => {
            eprintln!("internal evaluation failure: {}", error);
            return ExitCode::from(3);
        }
    };
    if let Some(bar) = progress {
        bar.finish_and_clear();
    }

    let summary = aggregate(&results);
    print_run_summary(&results, &summary);

    if args.enable_csv_export() {
        if let Err(error) = export_results(&results, Path::new(args.output_dir())) {
            eprintln!("{}", error);
            return ExitCode::from(2);
        }
        println!("Result CSVs written to {}", args.output_dir());
    }

    if args.json() {
        let path = Path::new(args.output_dir()).join("results.json");
        let write_json = || -> std::io::Result<()> {
            std::fs::create_dir_all(args.output_dir())?;
            let mut file = File::create(&path)?;
            let body = serde_json::to_string_pretty(&results)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            file.write_all(body.as_bytes())
        };
        if let Err(error) = write_json() {
            eprintln!("cannot write {}: {}", path.display(), error);
            return ExitCode::from(2);
        }
        println!("Full results written to {}", path.display());
    }

    logging::print_timing_report();
    ExitCode::SUCCESS
}
