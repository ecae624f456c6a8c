use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use taiga_forest::{Forest, PredictorTable, Response, TrainConfig};

#[derive(Parser)]
#[command(name = "taiga")]
#[command(about = "Random-forest training and prediction for tabular data")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// RNG seed for reproducibility
    #[arg(long, default_value_t = 42, global = true)]
    seed: u64,

    /// Enable verbose (debug-level) logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Train on a synthetic dataset and report out-of-bag quality
    Simulate {
        /// Number of rows to generate
        #[arg(long, default_value_t = 500)]
        rows: usize,

        /// Number of numeric predictors
        #[arg(long, default_value_t = 8)]
        numeric: usize,

        /// Number of factor predictors (cardinality 4)
        #[arg(long, default_value_t = 2)]
        factors: usize,

        /// Number of trees
        #[arg(long, default_value_t = 100)]
        trees: usize,

        /// Number of classes; 0 simulates a regression response
        #[arg(long, default_value_t = 3)]
        classes: usize,

        /// Save the trained model to this path
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Load a saved model and print its structure
    Inspect {
        /// Path to the model file
        model: PathBuf,
    },
}

/// Synthetic dataset: the first numeric column and the first factor
/// column carry the signal, everything else is noise.
///
/// `classes == 0` generates a regression response over two groups;
/// otherwise labels stay inside `[0, classes)`.
fn make_dataset(
    rows: usize,
    numeric: usize,
    factors: usize,
    classes: usize,
    seed: u64,
) -> Result<(PredictorTable, Response)> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let groups = if classes == 0 { 2 } else { classes };

    let mut num_cols = vec![Vec::with_capacity(rows); numeric];
    let mut fac_cols = vec![Vec::with_capacity(rows); factors];
    let mut y = Vec::with_capacity(rows);
    let mut y_ctg = Vec::with_capacity(rows);

    for row in 0..rows {
        let group = row % groups;
        for (idx, col) in num_cols.iter_mut().enumerate() {
            let base = if idx == 0 { group as f64 * 3.0 } else { 0.0 };
            col.push(base + rng.r#gen::<f64>());
        }
        for (idx, col) in fac_cols.iter_mut().enumerate() {
            let level = if idx == 0 {
                (group % 4) as u32
            } else {
                rng.gen_range(0..4)
            };
            col.push(level);
        }
        y.push(group as f64 + rng.r#gen::<f64>() * 0.1);
        y_ctg.push(group as u32);
    }

    let table = PredictorTable::from_columns(num_cols, fac_cols)?;
    let response = if classes == 0 {
        Response::regression(y)?
    } else {
        Response::classification(y_ctg, classes)?
    };
    Ok((table, response))
}

fn simulate(
    rows: usize,
    numeric: usize,
    factors: usize,
    trees: usize,
    classes: usize,
    save: Option<PathBuf>,
    seed: u64,
) -> Result<()> {
    let (table, response) = make_dataset(rows, numeric, factors, classes, seed)?;
    let result = TrainConfig::new(trees)?
        .with_seed(seed)
        .fit(&table, &response)?;

    info!(
        forest_size = result.metadata().forest_size,
        "trained {} trees over {} rows", trees, rows
    );
    for (pred, info) in result.pred_info().iter().enumerate() {
        println!("predictor {pred:>3}: info {info:.4}");
    }

    match &response {
        Response::Reg { y } => {
            let out = result.forest().predict_reg_oob(&table, result.bag(), y)?;
            println!(
                "oob mse {:.4} ({} rows unseen)",
                out.mse.unwrap_or(f64::NAN),
                out.rows_unseen.len()
            );
        }
        Response::Ctg { y_ctg, .. } => {
            let out = result
                .forest()
                .predict_ctg_oob(&table, result.bag(), y_ctg)?;
            if let Some(confusion) = &out.confusion {
                println!("oob accuracy {:.4}", confusion.accuracy());
                for (ctg, err) in out.class_errors.as_deref().unwrap_or(&[]).iter().enumerate() {
                    println!("class {ctg}: error {err:.4}");
                }
            }
        }
    }

    if let Some(path) = save {
        result.forest().save(&path, Some(result.bag()))?;
        println!("model saved to {}", path.display());
    }
    Ok(())
}

fn inspect(model: PathBuf) -> Result<()> {
    let (forest, bag) = Forest::load(&model)?;
    println!(
        "{} trees, {} nodes, {} numeric + {} factor predictors",
        forest.n_tree(),
        forest.forest_size(),
        forest.n_pred_num(),
        forest.n_pred_fac()
    );
    if forest.ctg_width() > 0 {
        println!("classification, {} classes", forest.ctg_width());
    } else {
        println!("regression");
    }
    for tree in 0..forest.n_tree() {
        println!(
            "tree {tree:>3}: {} nodes, {} leaves",
            forest.tree_size(tree),
            forest.leaf_count(tree)
        );
    }
    if let Some(bag) = bag {
        println!("bag matrix: {} trees x {} rows", bag.n_tree(), bag.n_row());
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match (cli.verbose, cli.quiet) {
        (true, _) => "debug",
        (_, true) => "error",
        _ => "info",
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Simulate {
            rows,
            numeric,
            factors,
            trees,
            classes,
            save,
        } => simulate(rows, numeric, factors, trees, classes, save, cli.seed),
        Command::Inspect { model } => inspect(model),
    }
}
