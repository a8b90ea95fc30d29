//! Process command - recognize a single payment screenshot.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};

use payshot_core::extract::{ExtractedFields, PaymentParser};
use payshot_core::ocr::{self, TesseractRecognizer};
use payshot_core::pipeline::IMAGE_EXTENSIONS;

use super::load_config;

/// Arguments for the process command.
#[derive(Args)]
pub struct ProcessArgs {
    /// Screenshot to recognize (jpg, jpeg or png)
    #[arg(required = true)]
    input: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Include the recognized text in the output
    #[arg(long)]
    show_text: bool,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Plain text summary
    Text,
}

/// Extraction result for one screenshot.
#[derive(Debug, Serialize)]
struct ProcessOutput {
    file: String,
    order_number: Option<String>,
    #[serde(with = "rust_decimal::serde::float_option")]
    amount: Option<Decimal>,
    complete: bool,
    deep_pass: bool,
    order_confidence: Option<f32>,
    amount_confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

impl ProcessOutput {
    fn new(file: String, fields: &ExtractedFields, deep_pass: bool, text: Option<String>) -> Self {
        Self {
            file,
            order_number: fields.order_number(),
            amount: fields.amount(),
            complete: fields.is_complete(),
            deep_pass,
            order_confidence: fields.order_number.as_ref().map(|m| m.confidence),
            amount_confidence: fields.amount.as_ref().map(|m| m.confidence),
            text,
        }
    }
}

pub async fn run(args: ProcessArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();
    let config = load_config(config_path)?;

    // Check input file exists
    if !args.input.is_file() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }

    let extension = args
        .input
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if !IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        anyhow::bail!("Unsupported file format: {}", extension);
    }

    info!("Processing file: {}", args.input.display());

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);

    let recognizer = TesseractRecognizer::new(config.ocr.clone());
    let parser = PaymentParser::from_config(&config.extraction);

    pb.set_message("Fast pass...");
    let fast_text = ocr::fast_pass(&recognizer, &args.input).await;
    let mut fields = parser.parse(&fast_text);
    let mut text = fast_text.clone();

    let deep_pass = !fields.is_complete();
    if deep_pass {
        pb.set_message("Deep pass...");
        let deep_text = ocr::deep_pass(&recognizer, &args.input).await;
        fields = parser.complete(fields, &fast_text, &deep_text);
        text = format!("{}\n{}", fast_text, deep_text);
    }

    pb.finish_and_clear();

    let result = ProcessOutput::new(
        args.input.display().to_string(),
        &fields,
        deep_pass,
        args.show_text.then_some(text),
    );

    let output = match args.format {
        OutputFormat::Json => serde_json::to_string_pretty(&result)?,
        OutputFormat::Text => format_text(&result),
    };

    if let Some(output_path) = &args.output {
        fs::write(output_path, &output)?;
        println!(
            "{} Output written to {}",
            style("✓").green(),
            output_path.display()
        );
    } else {
        println!("{}", output);
    }

    if !result.complete {
        eprintln!("{}", style("Order number or amount not recognized").yellow());
    }

    debug!("Total processing time: {:?}", start.elapsed());

    Ok(())
}

fn format_text(result: &ProcessOutput) -> String {
    let mut output = String::new();

    output.push_str(&format!("File: {}\n", result.file));
    output.push_str(&format!(
        "Order number: {}\n",
        result.order_number.as_deref().unwrap_or("-")
    ));
    match result.amount {
        Some(amount) => output.push_str(&format!("Amount: ¥{:.2}\n", amount)),
        None => output.push_str("Amount: -\n"),
    }
    output.push_str(&format!(
        "Passes: {}\n",
        if result.deep_pass { "fast + deep" } else { "fast" }
    ));

    if let Some(text) = &result.text {
        output.push_str("\nRecognized text:\n");
        output.push_str(text);
        output.push('\n');
    }

    output
}
