use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use serde_json::json;
use sweep_exp::{CumulativeTable, ResultRow, CONSTRAINT_COLUMN, COST_COLUMN};

#[derive(Args, Debug)]
pub struct TableArgs {
    /// Results table written by `sweep run`.
    #[arg(long)]
    pub results: PathBuf,
    /// Also export the table as CSV to this path.
    #[arg(long)]
    pub csv: Option<PathBuf>,
}

pub fn run(args: &TableArgs) -> Result<(), Box<dyn Error>> {
    let table = CumulativeTable::load(&args.results)?;
    if let Some(csv) = &args.csv {
        table.export_csv(csv)?;
    }
    let best = best_feasible(&table).map(|(row, cost)| json!({"task": row.task, "cost": cost}));
    let summary = json!({
        "rows": table.len(),
        "columns": table.columns(),
        "best": best,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Lowest-cost row whose constraint violation is zero or absent.
fn best_feasible(table: &CumulativeTable) -> Option<(&ResultRow, f64)> {
    table
        .rows()
        .iter()
        .filter(|row| {
            row.cells
                .get(CONSTRAINT_COLUMN)
                .and_then(|cell| cell.as_f64())
                .map_or(true, |violation| violation <= 0.0)
        })
        .filter_map(|row| {
            let cost = row.cells.get(COST_COLUMN)?.as_f64()?;
            (!cost.is_nan()).then_some((row, cost))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
}
