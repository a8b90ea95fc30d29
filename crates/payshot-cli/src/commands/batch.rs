//! Batch command - recognize and deduplicate a folder of screenshots.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use rust_decimal::Decimal;
use tracing::debug;

use payshot_core::cache;
use payshot_core::dispatch::DispatchObserver;
use payshot_core::models::record::ImageOutcome;
use payshot_core::models::report::{AmountCheck, BatchReport, Verdict};
use payshot_core::{BatchPipeline, TaskRegistry, TaskState};

use super::load_config;

/// Result directory used when `--output-dir` is not given, inside the input.
const DEFAULT_RESULT_DIR: &str = "payshot_result";

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Arguments for the batch command.
#[derive(Args)]
pub struct BatchArgs {
    /// Folder containing payment screenshots (searched recursively)
    #[arg(required = true)]
    input: PathBuf,

    /// Result directory for the cache, report and deduplicated copies
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Number of parallel recognizer workers
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Do not copy unique orders into the deduplicated folder
    #[arg(long)]
    no_copy: bool,

    /// Also generate a summary CSV
    #[arg(long)]
    summary: bool,

    /// Back up and clear the cache, recognizing every image again
    #[arg(long)]
    clear_cache: bool,

    /// Expected total for a folder, checked against recognized amounts
    /// (repeatable; "." is the input root)
    #[arg(long = "expect", value_name = "FOLDER=AMOUNT", value_parser = parse_expectation)]
    expect: Vec<(String, Decimal)>,
}

fn parse_expectation(value: &str) -> Result<(String, Decimal), String> {
    let (folder, amount) = value
        .rsplit_once('=')
        .ok_or_else(|| format!("expected FOLDER=AMOUNT, got {}", value))?;
    let folder = folder.trim().trim_end_matches('/');
    if folder.is_empty() {
        return Err(format!("missing folder in {}", value));
    }
    let amount = Decimal::from_str(amount.trim()).map_err(|e| format!("invalid amount {}: {}", amount, e))?;
    if amount.is_sign_negative() {
        return Err(format!("amount must not be negative: {}", amount));
    }
    Ok((folder.to_string(), amount))
}

/// Drives a progress bar from dispatcher events.
struct ProgressObserver {
    bar: ProgressBar,
}

impl DispatchObserver for ProgressObserver {
    fn on_start(&self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn on_outcome(&self, outcome: &ImageOutcome) {
        self.bar.set_message(outcome.image.file_name().to_string());
        self.bar.inc(1);
    }
}

pub async fn run(args: BatchArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut config = load_config(config_path)?;
    if let Some(jobs) = args.jobs {
        config.dispatch.concurrency = jobs.max(1);
    }
    if args.no_copy {
        config.output.copy_deduped = false;
    }
    config.reconcile.expected_amounts.extend(args.expect.iter().cloned());

    if !args.input.is_dir() {
        anyhow::bail!("Input folder not found: {}", args.input.display());
    }

    let result_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| args.input.join(DEFAULT_RESULT_DIR));
    let cache_path = result_dir.join(&config.output.cache_file);

    if args.clear_cache {
        match cache::clear(&cache_path)? {
            Some(backup) => println!(
                "{} Cache cleared (backup: {})",
                style("✓").green(),
                backup.display()
            ),
            None => println!("{} No cache to clear", style("ℹ").blue()),
        }
    } else if cache_path.exists() {
        println!("{} Incremental run, reusing {}", style("ℹ").blue(), cache_path.display());
    } else {
        println!("{} Full run, no cache yet", style("ℹ").blue());
    }

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );

    let observer = Arc::new(ProgressObserver { bar: bar.clone() });
    let pipeline = BatchPipeline::new(&args.input, &result_dir, config.clone()).with_observer(observer);

    let registry = TaskRegistry::new();
    let task_id = registry.submit(pipeline).await;
    debug!("Submitted batch task {}", task_id);
    let status = registry.wait(&task_id, POLL_INTERVAL).await?;

    let report = match status.state {
        TaskState::Completed(report) => {
            bar.finish_with_message("Complete");
            report
        }
        TaskState::Failed(error) => {
            bar.abandon();
            anyhow::bail!("Batch failed: {}", error);
        }
        other => anyhow::bail!("Batch ended in unexpected state: {}", other.label()),
    };

    print_report(&report, &args.input);

    if config.output.copy_deduped {
        println!(
            "{} Deduplicated copies in {}",
            style("✓").green(),
            result_dir.join(&config.output.deduped_dir).display()
        );
    }
    println!(
        "{} Report written to {}",
        style("✓").green(),
        result_dir.join(&config.output.report_file).display()
    );

    if args.summary {
        let summary_path = result_dir.join("summary.csv");
        write_summary(&summary_path, &report)?;
        println!(
            "{} Summary written to {}",
            style("✓").green(),
            summary_path.display()
        );
    }

    println!();
    println!(
        "{} Processed {} images in {:?}",
        style("✓").green(),
        report.total_files,
        start.elapsed()
    );

    Ok(())
}

fn print_report(report: &BatchReport, input: &Path) {
    println!();
    println!("{}", style(format!("Batch: {}", input.display())).bold());
    println!(
        "   {} images, {} recognized, {} from cache, {} failed",
        report.total_files,
        style(report.recognized_count).green(),
        style(report.cached_count).cyan(),
        style(report.failed_count).red()
    );

    if report.duplicate_images > 0 {
        println!(
            "   {} identical-content groups ({} files)",
            style(report.duplicate_images).yellow(),
            report.total_duplicate_files
        );
        for group in &report.duplicate_images_list {
            println!("     {}: {}", &group.hash[..8.min(group.hash.len())], group.files.join(", "));
        }
    }

    if !report.duplicates.is_empty() {
        println!();
        println!("{}", style("Duplicate orders:").yellow());
        for dup in &report.duplicates {
            println!("  {}  ¥{:.2}", dup.order_number, dup.amount);
            println!("    original: {}", dup.original_file);
            for file in &dup.duplicate_files {
                println!("    duplicate: {}", file);
            }
        }
    }

    if !report.folders.is_empty() {
        println!();
        println!("{}", style("By folder:").bold());
        for folder in &report.folders {
            print!(
                "  {:40} orders: {:3}  amount: ¥{:>10.2}",
                folder.folder, folder.orders, folder.amount
            );
            match &folder.check {
                Some(check) => println!("  {}", format_check(check)),
                None => println!(),
            }
        }
    }

    if !report.orders.is_empty() {
        println!();
        println!("{}", style("Orders (deduplicated):").bold());
        for order in &report.orders {
            println!(
                "  {:3}. ¥{:>8.2}  {:32}  {}",
                order.index, order.amount, order.order_number, order.relative_path
            );
        }
    }

    println!();
    println!(
        "{} {} unique orders, total ¥{:.2}",
        style("Σ").green(),
        report.unique_orders,
        report.total_amount
    );

    if let Some(check) = &report.amount_check {
        println!(
            "{} recognized ¥{:.2}, {}",
            style("Σ").green(),
            check.recognized,
            format_check(check)
        );
        if check.difference.is_sign_negative() && check.verdict != Verdict::Match {
            println!("   ¥{:.2} short, some images may not have been recognized", -check.difference);
        } else if check.verdict != Verdict::Match {
            println!("   ¥{:.2} over, check for duplicates or misread amounts", check.difference);
        }
    }

    if !report.failed_files.is_empty() {
        println!();
        println!("{}", style("Failed files:").red());
        for failed in &report.failed_files {
            println!("  - {}: {}", failed.relative_path, failed.reason);
        }
    }

    for failure in &report.hash_failures {
        println!("  - {}: {}", failure.relative_path, style(&failure.error).red());
    }
    for error in &report.materialization_errors {
        println!("  - copy {}: {}", error.relative_path, style(&error.error).red());
    }
}

fn format_check(check: &AmountCheck) -> String {
    let verdict = match check.verdict {
        Verdict::Match => style(check.verdict.label()).green(),
        Verdict::Close => style(check.verdict.label()).yellow(),
        Verdict::LargeGap => style(check.verdict.label()).red(),
    };
    let sign = if check.difference < Decimal::ZERO { "" } else { "+" };
    format!(
        "expected: ¥{:.2}  difference: {}{:.2}  {}",
        check.expected, sign, check.difference, verdict
    )
}

fn write_summary(path: &Path, report: &BatchReport) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record([
        "status",
        "index",
        "order_number",
        "amount",
        "folder",
        "relative_path",
        "deduped_name",
        "note",
    ])?;

    for order in &report.orders {
        wtr.write_record([
            "unique",
            &order.index.to_string(),
            &order.order_number,
            &format!("{:.2}", order.amount),
            &order.folder,
            &order.relative_path,
            &order.deduped_name,
            "",
        ])?;
    }

    for dup in &report.duplicates {
        for file in &dup.duplicate_files {
            wtr.write_record([
                "duplicate_order",
                "",
                &dup.order_number,
                &format!("{:.2}", dup.amount),
                "",
                file,
                "",
                &format!("same order as {}", dup.original_file),
            ])?;
        }
    }

    for group in &report.duplicate_images_list {
        for file in group.files.iter().skip(1) {
            wtr.write_record([
                "duplicate_image",
                "",
                "",
                "",
                "",
                file,
                "",
                &format!("identical to {}", group.files[0]),
            ])?;
        }
    }

    for failed in &report.failed_files {
        wtr.write_record([
            "failed",
            "",
            failed.order_number.as_deref().unwrap_or(""),
            &failed.amount.map(|a| format!("{:.2}", a)).unwrap_or_default(),
            "",
            &failed.relative_path,
            "",
            &failed.reason,
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
