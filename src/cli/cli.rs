use clap::Parser;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(short, long, help = "Facility configuration file (JSON)")]
    config: String,

    #[arg(short, long, default_value = "output")]
    output_dir: String,

    #[arg(long, help = "Evaluate periods in parallel", default_value_t = false)]
    parallel: bool,

    #[arg(long, help = "Write per-period result CSV files", default_value_t = true)]
    enable_csv_export: bool,

    #[arg(long, help = "Write the full result set as JSON", default_value_t = false)]
    json: bool,

    #[arg(long, default_value_t = false)]
    enable_timing: bool,

    #[arg(long, help = "Enable debug logging (more detailed output)", default_value_t = false)]
    debug_logging: bool,

    #[arg(long, help = "Show a progress bar over periods", default_value_t = false)]
    progress: bool,
}

impl Args {
    pub fn config(&self) -> &str {
        &self.config
    }

    pub fn output_dir(&self) -> &str {
        &self.output_dir
    }

    pub fn parallel(&self) -> bool {
        self.parallel
    }

    pub fn enable_csv_export(&self) -> bool {
        self.enable_csv_export
    }

    pub fn json(&self) -> bool {
        self.json
    }

    pub fn enable_timing(&self) -> bool {
        self.enable_timing
    }

    pub fn debug_logging(&self) -> bool {
        self.debug_logging
    }

    pub fn progress(&self) -> bool {
        self.progress
    }
}
