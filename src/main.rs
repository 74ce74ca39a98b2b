mod agent;
mod audit;
mod config;
mod critic;
mod environment;
mod graph;
mod kg;
mod planner;
mod types;
mod units;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing_subscriber::EnvFilter;

use agent::{ReasoningAgent, Solution, oracle::HttpOracle};
use audit::RunLogger;
use config::Config;
use environment::GraphEnvironment;
use kg::{KgClient, gateway::WikidataGateway};
use planner::CostPlanner;
use types::{Constraint, Operator, QuestionRecord};
use units::UnitNormalizer;

/// How many answers get their labels resolved for display.
const MAX_LABELED_ANSWERS: usize = 30;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cgot=info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse(std::env::args().skip(1))?;
    let config = Config::load()?;

    let gateway = Arc::new(WikidataGateway::new(&config)?);
    let kg: Arc<dyn KgClient> = gateway.clone();
    let oracle = Arc::new(HttpOracle::from_env()?);
    let run_log = RunLogger::new(&config.cache_path);
    tracing::info!(path = %run_log.path().display(), "run journal");

    let text = std::fs::read_to_string(&args.input)
        .with_context(|| format!("cannot read question file {}", args.input))?;
    let records: Vec<QuestionRecord> =
        serde_json::from_str(&text).context("question file is not valid JSON")?;
    if records.is_empty() {
        bail!("question file contains no questions");
    }

    let selected: Vec<(usize, QuestionRecord)> = match args.question {
        Some(idx) => {
            let record = records
                .get(idx)
                .with_context(|| {
                    format!(
                        "question index {idx} out of range ({} questions)",
                        records.len()
                    )
                })?
                .clone();
            vec![(idx, record)]
        }
        None => records.into_iter().enumerate().collect(),
    };

    for (idx, record) in selected {
        let planner = CostPlanner::new(Arc::clone(&kg), config.probe_limit, config.probe_fanout)?;
        let env = GraphEnvironment::new(Arc::clone(&kg), config.max_relaxations)?;
        let agent = ReasoningAgent::new(
            env,
            oracle.clone(),
            config.max_agent_steps,
            config.question_deadline,
        );

        println!("── Question {idx} ────────────────────────────────────────");
        println!("{}", record.question);
        match run_question(&record, &kg, &planner, &agent).await {
            Ok(solution) => {
                if let Err(e) = run_log.write(idx, &record.question, &solution) {
                    tracing::warn!("run journal write failed: {e}");
                }
                print_solution(&solution, kg.as_ref()).await;
            }
            Err(e) => {
                tracing::error!("question {idx} failed: {e:#}");
            }
        }
    }

    // Keep the on-disk cache current even when the last batch was small.
    gateway.flush_cache();
    Ok(())
}

/// Link, normalize, plan, then hand the ordered constraints to the agent.
async fn run_question(
    record: &QuestionRecord,
    kg: &Arc<dyn KgClient>,
    planner: &CostPlanner,
    agent: &ReasoningAgent,
) -> Result<Solution> {
    let mut constraints: Vec<Constraint> = Vec::new();
    for rec in record.constraints.clone() {
        let code = match rec.property_code.clone() {
            Some(code) => Some(code),
            None => match kg.search_property(&rec.property_label).await {
                Ok(code) => code,
                Err(e) => {
                    tracing::warn!(label = %rec.property_label, "property linking failed: {e}");
                    None
                }
            },
        };
        let Some(code) = code else {
            tracing::warn!(
                label = %rec.property_label,
                "no property code found, dropping constraint"
            );
            continue;
        };
        if let Some(mut c) = rec.into_constraint(code) {
            link_entity_value(kg, &mut c).await;
            constraints.push(c);
        }
    }
    if constraints.is_empty() {
        bail!("no usable constraints after linking");
    }

    UnitNormalizer::normalize(&mut constraints);
    let ordered = planner.plan(constraints).await;
    Ok(agent.solve(&record.question, ordered).await)
}

/// Try to turn an equality value that looks like an entity label ("science
/// fiction") into its entity code, so anchors and filters can use the
/// direct-claim edge instead of label matching. Best-effort: a miss leaves
/// the label in place and the label-fallback query handles it.
async fn link_entity_value(kg: &Arc<dyn KgClient>, c: &mut Constraint) {
    if c.operator != Operator::Eq {
        return;
    }
    let looks_like_label = c.value.chars().any(char::is_alphabetic)
        && !(c.value.starts_with('Q') && c.value[1..].chars().all(|ch| ch.is_ascii_digit()));
    if !looks_like_label {
        return;
    }
    match kg.search_entity(&c.value).await {
        Ok(Some(code)) => {
            tracing::info!(id = %c.id, "linked value '{}' -> {code}", c.value);
            c.value = code;
        }
        Ok(None) => {
            tracing::info!(id = %c.id, "no entity found for '{}', keeping label", c.value);
        }
        Err(e) => {
            tracing::warn!(id = %c.id, "entity linking failed: {e}");
        }
    }
}

async fn print_solution(solution: &Solution, kg: &dyn KgClient) {
    println!("Answer ({} entities):", solution.answers.len());
    let codes: Vec<String> = solution
        .answers
        .iter()
        .take(MAX_LABELED_ANSWERS)
        .cloned()
        .collect();
    let labels = match kg.resolve_labels(&codes).await {
        Ok(labels) => labels,
        Err(e) => {
            tracing::warn!("label resolution failed: {e}");
            Default::default()
        }
    };
    for code in &codes {
        match labels.get(code) {
            Some(label) => println!("  {code}  {label}"),
            None => println!("  {code}"),
        }
    }
    if solution.answers.len() > codes.len() {
        println!("  ... ({} more)", solution.answers.len() - codes.len());
    }
    println!("Trace:");
    for line in &solution.trace {
        println!("  {line}");
    }
}

/// The CLI takes the question file and an optional single-question index.
struct CliArgs {
    input: String,
    question: Option<usize>,
}

impl CliArgs {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut input = "questions.json".to_string();
        let mut question = None;
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--input" | "-i" => {
                    input = args.next().context("--input requires a file path")?;
                }
                "--question" | "-q" => {
                    let raw = args.next().context("--question requires an index")?;
                    question = Some(raw.parse().context("--question index must be a number")?);
                }
                "--help" | "-h" => {
                    println!("usage: cgot [--input <questions.json>] [--question <index>]");
                    std::process::exit(0);
                }
                other => bail!("unknown argument '{other}'"),
            }
        }
        Ok(Self { input, question })
    }
}

#[cfg(test)]
mod tests {
    use super::CliArgs;

    #[test]
    fn cli_defaults() {
        let args = CliArgs::parse(std::iter::empty()).expect("parse");
        assert_eq!(args.input, "questions.json");
        assert_eq!(args.question, None);
    }

    #[test]
    fn cli_parses_input_and_question() {
        let argv = ["--input", "data/q.json", "-q", "3"]
            .iter()
            .map(|s| s.to_string());
        let args = CliArgs::parse(argv).expect("parse");
        assert_eq!(args.input, "data/q.json");
        assert_eq!(args.question, Some(3));
    }

    #[test]
    fn cli_rejects_unknown_flags() {
        let argv = ["--frobnicate"].iter().map(|s| s.to_string());
        assert!(CliArgs::parse(argv).is_err());
    }
}
