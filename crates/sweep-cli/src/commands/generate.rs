use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use sweep_exp::{generate, load_config, SweepLayout, TaskTemplate};

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Sweep configuration (YAML).
    #[arg(long)]
    pub config: PathBuf,
    /// Base task descriptor (YAML) with an `execute.params` mapping.
    #[arg(long)]
    pub template: PathBuf,
    /// Sweep output directory; descriptors go to `<out>/tasks`.
    #[arg(long)]
    pub out: PathBuf,
}

pub fn run(args: &GenerateArgs) -> Result<(), Box<dyn Error>> {
    let config = load_config(&args.config)?;
    let template = TaskTemplate::load(&args.template)?;
    let layout = SweepLayout::new(&args.out);
    let written = generate(&config, &template, &layout)?;
    println!(
        "{} descriptors written to {}",
        written.len(),
        layout.tasks_dir().display()
    );
    Ok(())
}
