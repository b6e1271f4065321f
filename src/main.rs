//! ordergen: permutation algebra and order-aware search.
//!
//! CLI entry point. Runs the library pipeline on seeded random scores and a
//! synthetic sentence, logging results with `tracing`.

use anyhow::{ensure, Context, Result};
use clap::{Args, Parser, Subcommand};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing_subscriber::EnvFilter;

use ordergen::analysis::{compare_with_fixed_orders, WordOrderStatistics};
use ordergen::birkhoff::{gumbel_matching, project_to_permutation, BirkhoffDecomposer, DecomposerConfig};
use ordergen::config::{END_ID, NUM_RESERVED, PAD_ID, START_ID};
use ordergen::normalize::{permutable_mask, validity_mask, NormalizerConfig, StickBreaking};
use ordergen::permutation::{matrix_to_order, matrix_to_pointer, FixedOrder};
use ordergen::OrderError;
use ordergen::search::{BeamSearch, BeamSearchConfig, NucleusConfig, NucleusSampler, OracleScorer};

/// ordergen CLI.
#[derive(Parser, Debug)]
#[command(
    name = "ordergen",
    about = "Soft permutations and insertion-order search",
    version
)]
struct Cli {
    /// Random seed.
    #[arg(short, long, default_value_t = 0, global = true)]
    seed: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Normalize random scores into a doubly stochastic matrix.
    Normalize(MatrixArgs),
    /// Normalize random scores, then split into weighted permutations.
    Decompose {
        #[command(flatten)]
        matrix: MatrixArgs,

        /// Term cap (defaults to the sequence length).
        #[arg(long)]
        max_terms: Option<usize>,

        /// Gumbel-matching samples to draw from the same scores.
        #[arg(long, default_value_t = 0)]
        gumbel_samples: usize,
    },
    /// Decode a synthetic sentence with an oracle scorer.
    Decode {
        /// Content tokens in the synthetic sentence.
        #[arg(short, long, default_value_t = 6)]
        length: usize,

        /// Vocabulary size, reserved ids included.
        #[arg(long, default_value_t = 32)]
        vocab_size: usize,

        /// Order the oracle follows: l2r, r2l, common or rare.
        #[arg(short, long, default_value = "l2r")]
        order: FixedOrder,

        /// Probability the oracle puts on its own next choice.
        #[arg(long, default_value_t = 0.9)]
        confidence: f32,

        #[arg(short, long, default_value_t = 4)]
        beam_size: usize,

        /// Nucleus samples to draw.
        #[arg(long, default_value_t = 4)]
        samples: usize,

        /// Nucleus probability mass.
        #[arg(long, default_value_t = 0.95)]
        top_p: f32,
    },
}

#[derive(Args, Debug)]
struct MatrixArgs {
    /// Content tokens (start and end are added).
    #[arg(short, long, default_value_t = 5)]
    length: usize,

    /// Trailing padding positions.
    #[arg(long, default_value_t = 1)]
    padding: usize,

    /// Stick-breaking temperature.
    #[arg(short, long, default_value_t = 1.0)]
    temperature: f32,
}

fn synthetic_sentence(rng: &mut StdRng, content: usize, padding: usize, vocab_size: usize) -> Vec<usize> {
    let mut tokens = Vec::with_capacity(content + padding + 2);
    tokens.push(START_ID);
    tokens.extend((0..content).map(|_| rng.gen_range(NUM_RESERVED..vocab_size)));
    tokens.push(END_ID);
    tokens.extend(std::iter::repeat(PAD_ID).take(padding));
    tokens
}

fn soft_permutation(rng: &mut StdRng, args: &MatrixArgs) -> Result<(Vec<usize>, Array2<f32>, Array2<f32>)> {
    let tokens = synthetic_sentence(rng, args.length, args.padding, 1000);
    let mask = validity_mask(&permutable_mask(&tokens));
    let n = tokens.len();
    let scores = Array2::from_shape_fn((n, n), |_| rng.sample::<f32, _>(StandardNormal));

    let normalizer = StickBreaking::new(NormalizerConfig::default().with_temperature(args.temperature));
    let p = normalizer
        .normalize(scores.view(), mask.view())
        .context("stick-breaking normalization failed")?;
    Ok((tokens, scores, p))
}

fn run_normalize(rng: &mut StdRng, args: &MatrixArgs) -> Result<()> {
    let (tokens, _, p) = soft_permutation(rng, args)?;
    tracing::info!("Tokens: {:?}", tokens);
    tracing::info!("Soft permutation:\n{:.3}", p);

    let rows = p.rows().into_iter().map(|r| (r.sum() - 1.0).abs()).fold(0.0f32, f32::max);
    let cols = p.columns().into_iter().map(|c| (c.sum() - 1.0).abs()).fold(0.0f32, f32::max);
    tracing::info!("Max marginal deviation: rows {:.2e}, columns {:.2e}", rows, cols);

    let hard = project_to_permutation(p.view())?;
    tracing::info!("Nearest permutation: {:?}", matrix_to_order(hard.view())?);
    let (labels, _) = matrix_to_pointer(hard.view())?;
    let slots: Vec<usize> = labels
        .rows()
        .into_iter()
        .map(|r| r.iter().position(|&v| v == 1.0).unwrap_or(0))
        .collect();
    tracing::info!("Pointer slots: {:?}", slots);
    Ok(())
}

fn run_decompose(rng: &mut StdRng, args: &MatrixArgs, max_terms: Option<usize>, gumbel_samples: usize) -> Result<()> {
    let (_, scores, p) = soft_permutation(rng, args)?;
    let config = DecomposerConfig {
        max_terms,
        ..Default::default()
    };
    let decomposition = match BirkhoffDecomposer::new(config).decompose(p.view()) {
        Ok(d) => d,
        Err(OrderError::NonConvergent { partial, residual }) => {
            tracing::warn!(
                "Residual mass {:.3e} left after {} terms; raise --max-terms",
                residual,
                partial.len()
            );
            partial
        }
        Err(e) => return Err(e).context("birkhoff decomposition failed"),
    };

    tracing::info!("{} terms, total weight {:.6}", decomposition.len(), decomposition.total_weight());
    for term in &decomposition.terms {
        tracing::info!("  {:.4}  {:?}", term.weight, term.permutation);
    }
    let error = (&decomposition.reconstruct() - &p)
        .iter()
        .fold(0.0f32, |m, v| m.max(v.abs()));
    tracing::info!("Max reconstruction error: {:.2e}", error);

    if let Some(term) = decomposition.sample(rng) {
        tracing::info!("Sampled permutation: {:?}", term.permutation);
    }
    for sample in gumbel_matching(scores.view(), gumbel_samples, args.temperature, rng)? {
        tracing::info!("Gumbel sample {:?} (score {:.3})", sample.permutation, sample.log_score);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_decode(
    rng: &mut StdRng,
    length: usize,
    vocab_size: usize,
    order: FixedOrder,
    confidence: f32,
    beam_size: usize,
    samples: usize,
    top_p: f32,
) -> Result<()> {
    ensure!(vocab_size > NUM_RESERVED, "vocab size must exceed {}", NUM_RESERVED);
    let target = synthetic_sentence(rng, length, 0, vocab_size);
    let generation = order.generation_order(&target, &vec![true; target.len()])?;
    let oracle = OracleScorer::new(target.clone(), generation, vocab_size, confidence)?;
    tracing::info!("Target: {:?} (oracle order {})", target, order);

    let max_iterations = target.len() + 4;
    let beam = BeamSearch::new(
        BeamSearchConfig::new(vocab_size)
            .with_beam_size(beam_size)
            .with_max_iterations(max_iterations),
    );
    let mut stats = WordOrderStatistics::new();

    for decoded in beam.decode(&oracle)? {
        tracing::info!(
            "Beam: {:?} logp {:.3}{}",
            decoded.ordered,
            decoded.log_prob,
            if decoded.truncated { " (truncated)" } else { "" }
        );
        for d in compare_with_fixed_orders(&decoded)?.distances {
            tracing::info!("  vs {}: spearman {:?}, edit {}", d.order, d.spearman, d.edit_distance);
        }
        stats.update(&decoded);
    }

    let sampler = NucleusSampler::new(
        NucleusConfig::new(vocab_size)
            .with_num_samples(samples)
            .with_probability(top_p)
            .with_max_iterations(max_iterations),
    );
    for decoded in sampler.sample(&oracle, rng)? {
        tracing::info!("Sample: {:?} logp {:.3}", decoded.ordered, decoded.log_prob);
        stats.update(&decoded);
    }

    let found = beam.search_order(&oracle, &target)?;
    if let Some(best) = found.best() {
        tracing::info!("Best order for target: {:?}", best.order);
    }
    if let Some(picked) = found.pick(rng) {
        tracing::info!("Picked training order: {:?}", picked.order);
    }

    for summary in stats.finalize() {
        tracing::info!(
            "  token {:>4}: mean location {:.3} over {}",
            summary.token,
            summary.mean_location,
            summary.count
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    tracing::info!("ordergen v{} (seed {})", env!("CARGO_PKG_VERSION"), cli.seed);
    let mut rng = StdRng::seed_from_u64(cli.seed);

    match &cli.command {
        Command::Normalize(args) => run_normalize(&mut rng, args),
        Command::Decompose {
            matrix,
            max_terms,
            gumbel_samples,
        } => run_decompose(&mut rng, matrix, *max_terms, *gumbel_samples),
        Command::Decode {
            length,
            vocab_size,
            order,
            confidence,
            beam_size,
            samples,
            top_p,
        } => run_decode(
            &mut rng,
            *length,
            *vocab_size,
            *order,
            *confidence,
            *beam_size,
            *samples,
            *top_p,
        ),
    }
}
