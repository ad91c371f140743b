//! steer-gen CLI
//!
//! Steer a frozen language model toward a topic, a formal register or verse constraints.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use candle_core::Device;
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;

use steer_gen::inference::{
    BoundedConfig, FusionWeight, LineConfig, PoetryPredictors, Selection, TopicConfig,
    VerseContext, complete_couplet, generate_bounded, generate_topic,
};
use steer_gen::lm::{GptModel, HfTokenizer, LanguageModel, TextTokenizer};
use steer_gen::metrics::{
    PerplexitySummary, conditional_perplexity, distinctness, poetry_report, topic_matches,
};
use steer_gen::model::Task;
use steer_gen::oracle::PronouncingDict;
use steer_gen::tables::{DEFAULT_MAX_VOCAB, RhymeTable, UNKNOWN_RHYME_GROUP, WordVocab};
use steer_gen::weights::{load_gpt_dir, load_predictor, select_device};

/// Output format for generated text.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Plain,
    /// JSON with metadata
    Json,
}

/// steer-gen - Attribute-steered decoding with lightweight future predictors.
#[derive(Debug, Parser)]
#[command(
    name = "steer-gen",
    version,
    about = "Steer a frozen language model with attribute predictors",
    long_about = "Re-ranks a frozen language model's top candidates at every step with small \
                  predictors estimating whether the finished text will have a desired attribute."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Continue a prompt toward a bag of topic words
    Topic(TopicArgs),
    /// Continue text in a formal register (greedy)
    Formality(FormalityArgs),
    /// Write a second line rhyming with the given first line
    Poetry(PoetryArgs),
    /// Build the word vocabulary and rhyme-group tables from a corpus
    Tables(TablesArgs),
    /// Score generated text
    #[command(subcommand)]
    Metrics(MetricsCommand),
}

/// Flags shared by the generation subcommands.
#[derive(Debug, Args)]
struct DecodeArgs {
    /// Directory with config.json, model.safetensors and tokenizer.json
    #[arg(long)]
    base_model: PathBuf,

    /// Base-model candidates scored per step
    #[arg(long, default_value = "200")]
    precondition_topk: usize,

    /// Weight of the attribute scores (0 = plain base-model decoding)
    #[arg(long = "lambda", default_value = "1.0")]
    condition_lambda: f32,

    /// cpu or cuda
    #[arg(long, default_value = "cpu")]
    device: String,

    /// Random seed for reproducible sampling
    #[arg(long)]
    seed: Option<u64>,

    /// Interactive REPL mode
    #[arg(short, long)]
    interactive: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "plain")]
    format: OutputFormat,
}

#[derive(Debug, Args)]
struct TopicArgs {
    /// Prompt to continue
    #[arg(index = 1)]
    prompt: Option<String>,

    /// Topic predictor checkpoint stem
    #[arg(long)]
    checkpoint: PathBuf,

    /// Word vocabulary JSON written by `tables`
    #[arg(long)]
    vocab: PathBuf,

    /// Comma-separated condition words
    #[arg(long, value_delimiter = ',', required = true)]
    condition_words: Vec<String>,

    /// Candidates kept for sampling after fusion
    #[arg(long, default_value = "10")]
    topk: usize,

    /// Total sequence length, prompt included
    #[arg(long, default_value = "80")]
    length_cutoff: usize,

    #[command(flatten)]
    decode: DecodeArgs,
}

#[derive(Debug, Args)]
struct FormalityArgs {
    /// Source text to continue
    #[arg(index = 1)]
    prompt: Option<String>,

    /// Formality predictor checkpoint stem
    #[arg(long)]
    checkpoint: PathBuf,

    /// Decoder positions, start position included
    #[arg(long, default_value = "64")]
    length_cutoff: usize,

    #[command(flatten)]
    decode: DecodeArgs,
}

#[derive(Debug, Args)]
struct PoetryArgs {
    /// First line of the couplet
    #[arg(index = 1)]
    prompt: Option<String>,

    #[arg(long)]
    iambic_checkpoint: PathBuf,

    #[arg(long)]
    rhyme_checkpoint: PathBuf,

    #[arg(long)]
    newline_checkpoint: PathBuf,

    /// Rhyme table JSON written by `tables`
    #[arg(long)]
    rhyme_table: PathBuf,

    /// CMU-format pronouncing dictionary
    #[arg(long)]
    pronouncing_dict: PathBuf,

    /// Candidates kept for sampling after fusion
    #[arg(long, default_value = "10")]
    topk: usize,

    /// Maximum tokens per generated line
    #[arg(long, default_value = "30")]
    length_cutoff: usize,

    #[command(flatten)]
    decode: DecodeArgs,
}

#[derive(Debug, Args)]
struct TablesArgs {
    /// Directory of plain-text corpus files, one sentence per line
    #[arg(long)]
    corpus_dir: PathBuf,

    /// CMU-format pronouncing dictionary
    #[arg(long)]
    pronouncing_dict: PathBuf,

    #[arg(long, default_value_t = DEFAULT_MAX_VOCAB)]
    max_vocab: usize,

    /// Where vocab.json and rhyme_groups.json are written
    #[arg(long)]
    out_dir: PathBuf,
}

#[derive(Debug, Subcommand)]
enum MetricsCommand {
    /// Meter, rhyme, line-end and syllable success rates
    Poetry {
        #[arg(long)]
        prefix_file: PathBuf,
        #[arg(long)]
        pred_file: PathBuf,
        #[arg(long)]
        pronouncing_dict: PathBuf,
        #[command(flatten)]
        scorer: ScorerArgs,
    },
    /// Distinct 1/2/3-gram ratios
    Distinct {
        #[arg(long)]
        pred_file: PathBuf,
    },
    /// Wordlist matches
    Topic {
        #[arg(long)]
        pred_file: PathBuf,
        /// One word per line
        #[arg(long)]
        wordlist: PathBuf,
        /// Max matches counted per sentence
        #[arg(long)]
        cap: Option<usize>,
        #[command(flatten)]
        scorer: ScorerArgs,
    },
}

/// Optional language model used to score perplexity.
#[derive(Debug, Args)]
struct ScorerArgs {
    /// GPT-2 directory to compute perplexity with (skipped when absent)
    #[arg(long)]
    base_model: Option<PathBuf>,

    /// cpu or cuda
    #[arg(long, default_value = "cpu")]
    device: String,
}

impl ScorerArgs {
    fn load(&self) -> Result<Option<(GptModel, HfTokenizer)>> {
        let Some(dir) = &self.base_model else {
            return Ok(None);
        };
        let device = select_device(&self.device)?;
        Ok(Some(load_gpt_dir(dir, &device)?))
    }
}

#[derive(Debug, Serialize)]
struct JsonOutput<'a> {
    task: &'a str,
    prompt: &'a str,
    outputs: &'a [String],
    generation_time_ms: u64,
    seed: Option<u64>,
    condition_lambda: f32,
    precondition_topk: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Command::Topic(args) => run_topic(&args),
        Command::Formality(args) => run_formality(&args),
        Command::Poetry(args) => run_poetry(&args),
        Command::Tables(args) => run_tables(&args),
        Command::Metrics(cmd) => run_metrics(&cmd),
    }
}

fn make_rng(seed: Option<u64>) -> StdRng {
    seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64)
}

fn load_base(args: &DecodeArgs) -> Result<(Device, GptModel, HfTokenizer)> {
    let device = select_device(&args.device)?;
    let (model, tokenizer) = load_gpt_dir(&args.base_model, &device)?;
    Ok((device, model, tokenizer))
}

/// Run `generate` once for `prompt`, or once per stdin line in interactive mode.
fn drive<F>(task: Task, prompt: Option<&str>, args: &DecodeArgs, mut generate: F) -> Result<()>
where
    F: FnMut(&str) -> Result<Vec<String>>,
{
    let mut run = |input: &str| -> Result<()> {
        let start = Instant::now();
        let outputs = generate(input)?;
        let generation_time_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        output(task, input, &outputs, generation_time_ms, args)
    };

    if !args.interactive {
        let prompt = prompt.context(
            "No prompt provided. Pass one as the first argument or use --interactive.",
        )?;
        return run(prompt);
    }

    println!("steer-gen {task} - Interactive Mode");
    println!("Type a prompt and press Enter. Type 'quit' or 'exit' to leave.\n");
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input.eq_ignore_ascii_case("quit") || input.eq_ignore_ascii_case("exit") {
            break;
        }
        if input.is_empty() {
            continue;
        }
        if let Err(err) = run(input) {
            eprintln!("Error: {err:#}");
            eprintln!();
        }
    }
    Ok(())
}

fn output(
    task: Task,
    prompt: &str,
    outputs: &[String],
    generation_time_ms: u64,
    args: &DecodeArgs,
) -> Result<()> {
    match args.format {
        OutputFormat::Plain => {
            for text in outputs {
                println!("{text}");
            }
        }
        OutputFormat::Json => {
            let payload = JsonOutput {
                task: task.as_str(),
                prompt,
                outputs,
                generation_time_ms,
                seed: args.seed,
                condition_lambda: args.condition_lambda,
                precondition_topk: args.precondition_topk,
            };
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
    }
    Ok(())
}

fn run_topic(args: &TopicArgs) -> Result<()> {
    let (device, model, tokenizer) = load_base(&args.decode)?;
    let (predictor, meta) = load_predictor(&args.checkpoint, Task::Topic, &device)?;
    let vocab = WordVocab::load(&args.vocab)
        .with_context(|| format!("load vocabulary {}", args.vocab.display()))?;
    meta.config.check_compatible(model.vocab_size(), Some(vocab.len()))?;
    let words: Vec<&str> = args.condition_words.iter().map(String::as_str).collect();
    let cfg = TopicConfig {
        precondition_topk: args.decode.precondition_topk,
        selection: Selection::Sample {
            postcondition_topk: args.topk,
        },
        condition_lambda: FusionWeight(args.decode.condition_lambda),
        length_cutoff: args.length_cutoff,
    };
    let mut rng = make_rng(args.decode.seed);
    info!("conditioning on {words:?}");

    drive(Task::Topic, args.prompt.as_deref(), &args.decode, |prompt| {
        let results = generate_topic(
            &model,
            &tokenizer,
            predictor.as_ref(),
            &vocab,
            &[prompt],
            &words,
            &cfg,
            &mut rng,
        )?;
        Ok(results.into_iter().map(|g| g.text).collect())
    })
}

fn run_formality(args: &FormalityArgs) -> Result<()> {
    let (device, model, tokenizer) = load_base(&args.decode)?;
    let (predictor, meta) = load_predictor(&args.checkpoint, Task::Formality, &device)?;
    meta.config.check_compatible(model.vocab_size(), None)?;
    let eos = model
        .config()
        .eos_token_id
        .context("base model config has no eos_token_id")?;
    // Decoder-only continuation: no start token to ban, padding reuses the end token.
    let cfg = BoundedConfig {
        precondition_topk: args.decode.precondition_topk,
        condition_lambda: FusionWeight(args.decode.condition_lambda),
        max_length: args.length_cutoff,
        decoder_start_token_id: eos,
        end_token_id: eos,
        pad_token_id: eos,
        banned_tokens: Vec::new(),
        ..BoundedConfig::default()
    };

    drive(Task::Formality, args.prompt.as_deref(), &args.decode, |prompt| {
        let source = tokenizer.encode(prompt)?;
        let outputs = generate_bounded(&model, predictor.as_ref(), &[source], &cfg)?;
        outputs
            .iter()
            .map(|ids| Ok(tokenizer.decode(ids)?))
            .collect()
    })
}

fn run_poetry(args: &PoetryArgs) -> Result<()> {
    let (device, model, tokenizer) = load_base(&args.decode)?;
    let (iambic, iambic_meta) = load_predictor(&args.iambic_checkpoint, Task::Iambic, &device)?;
    let (rhyme, rhyme_meta) = load_predictor(&args.rhyme_checkpoint, Task::Rhyme, &device)?;
    let (newline, newline_meta) =
        load_predictor(&args.newline_checkpoint, Task::Newline, &device)?;
    let rhymes = RhymeTable::load(&args.rhyme_table)
        .with_context(|| format!("load rhyme table {}", args.rhyme_table.display()))?;
    iambic_meta.config.check_compatible(model.vocab_size(), None)?;
    rhyme_meta
        .config
        .check_compatible(model.vocab_size(), Some(rhymes.num_groups()))?;
    newline_meta.config.check_compatible(model.vocab_size(), None)?;
    let oracle = PronouncingDict::from_file(&args.pronouncing_dict)
        .with_context(|| format!("load {}", args.pronouncing_dict.display()))?;

    let ctx = VerseContext {
        model: &model,
        tokenizer: &tokenizer,
        predictors: PoetryPredictors {
            iambic: iambic.as_ref(),
            rhyme: rhyme.as_ref(),
            newline: newline.as_ref(),
        },
        oracle: &oracle,
        rhymes: &rhymes,
    };
    let cfg = LineConfig {
        precondition_topk: args.decode.precondition_topk,
        selection: Selection::Sample {
            postcondition_topk: args.topk,
        },
        condition_lambda: FusionWeight(args.decode.condition_lambda),
        length_cutoff: args.length_cutoff,
        ..LineConfig::default()
    };
    let mut rng = make_rng(args.decode.seed);

    drive(Task::Rhyme, args.prompt.as_deref(), &args.decode, |first_line| {
        let couplet = complete_couplet(&ctx, first_line, &cfg, &mut rng)?;
        Ok(couplet.to_vec())
    })
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    Ok(raw.lines().map(str::to_string).collect())
}

fn run_tables(args: &TablesArgs) -> Result<()> {
    let mut lines = Vec::new();
    let mut entries: Vec<PathBuf> = std::fs::read_dir(&args.corpus_dir)
        .with_context(|| format!("read corpus dir {}", args.corpus_dir.display()))?
        .map(|e| e.map(|e| e.path()))
        .collect::<io::Result<_>>()?;
    entries.sort();
    for path in entries.iter().filter(|p| p.is_file()) {
        lines.extend(read_lines(path)?);
    }
    info!("counting words over {} lines", lines.len());

    let counts = WordVocab::count_words(lines.iter().map(String::as_str));
    let vocab = WordVocab::from_counts(counts, args.max_vocab);
    let oracle = PronouncingDict::from_file(&args.pronouncing_dict)
        .with_context(|| format!("load {}", args.pronouncing_dict.display()))?;
    let rhymes = RhymeTable::build(&vocab, &oracle);
    let unresolved = rhymes.group_count(UNKNOWN_RHYME_GROUP);
    if unresolved > 0 {
        warn!("{unresolved} word occurrences have no rhyme data and map to {UNKNOWN_RHYME_GROUP}");
    }

    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("create {}", args.out_dir.display()))?;
    vocab.save(&args.out_dir.join("vocab.json"))?;
    rhymes.save(&args.out_dir.join("rhyme_groups.json"))?;
    info!(
        "wrote {} words and {} rhyme groups to {}",
        vocab.len(),
        rhymes.num_groups(),
        args.out_dir.display()
    );
    Ok(())
}

fn run_metrics(cmd: &MetricsCommand) -> Result<()> {
    match cmd {
        MetricsCommand::Poetry {
            prefix_file,
            pred_file,
            pronouncing_dict,
            scorer,
        } => {
            let prefixes = read_lines(prefix_file)?;
            let preds = read_lines(pred_file)?;
            if prefixes.len() != preds.len() {
                anyhow::bail!(
                    "{} prefixes but {} predictions",
                    prefixes.len(),
                    preds.len()
                );
            }
            let oracle = PronouncingDict::from_file(pronouncing_dict)
                .with_context(|| format!("load {}", pronouncing_dict.display()))?;
            let prefixes: Vec<&str> = prefixes.iter().map(|s| s.trim()).collect();
            let preds: Vec<&str> = preds.iter().map(String::as_str).collect();
            let report = poetry_report(&oracle, &prefixes, &preds);
            println!("{}", serde_json::to_string_pretty(&report)?);
            println!("{}", serde_json::to_string_pretty(&distinctness(&preds))?);
            if let Some((model, tokenizer)) = scorer.load()? {
                let values = prefixes
                    .iter()
                    .zip(&preds)
                    .map(|(prefix, pred)| conditional_perplexity(&model, &tokenizer, prefix, pred))
                    .collect::<Result<Vec<_>, _>>()?;
                print_perplexity(&values)?;
            }
        }
        MetricsCommand::Distinct { pred_file } => {
            let preds = read_lines(pred_file)?;
            let preds: Vec<&str> = preds.iter().map(|s| s.trim()).collect();
            println!("{}", serde_json::to_string_pretty(&distinctness(&preds))?);
        }
        MetricsCommand::Topic {
            pred_file,
            wordlist,
            cap,
            scorer,
        } => {
            let preds = read_lines(pred_file)?;
            let words = read_lines(wordlist)?;
            let words: Vec<&str> = words.iter().map(String::as_str).collect();
            let matches = topic_matches(&preds, &words, *cap);
            println!("wordlist matches: {matches} over {} sentences", preds.len());
            if let Some((model, tokenizer)) = scorer.load()? {
                // Whole sentences are scored after the token with id 0.
                let start = tokenizer.decode(&[0])?;
                let values = preds
                    .iter()
                    .map(|pred| conditional_perplexity(&model, &tokenizer, &start, pred.trim()))
                    .collect::<Result<Vec<_>, _>>()?;
                print_perplexity(&values)?;
            }
        }
    }
    Ok(())
}

fn print_perplexity(values: &[f64]) -> Result<()> {
    let summary = PerplexitySummary::from_values(values);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
