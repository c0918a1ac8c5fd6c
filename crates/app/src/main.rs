use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use job_search_core::{
    compose_query_text, ensure_index, escape_markdown, extract_resume_text, ingest_file, search,
    select_hit, to_table, BackoffPolicy, EnsureOptions, FitAnalyser, Filter, IndexControl, IndexSpec,
    IngestionJob, JobListing, LoadPolicy, OpenAiConfig, OpenAiFitAnalyser, PineconeClient,
    PineconeConfig, PipelineError, PromptTemplates, SearchHit, UpsertError, UpsertOptions,
    CLASSIFICATION_FIELD, DEFAULT_TOP_K, LOCATION_FIELD, WORK_TYPE_FIELD,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "job-search", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Pinecone API key
    #[arg(long, env = "PINECONE_API_KEY", hide_env_values = true)]
    pinecone_api_key: String,

    /// Pinecone control-plane URL
    #[arg(long, env = "PINECONE_CONTROL_URL", default_value = "https://api.pinecone.io")]
    pinecone_control_url: String,

    /// Index name
    #[arg(long, env = "JOB_SEARCH_INDEX", default_value = "seek-ads")]
    index: String,

    /// Namespace inside the index
    #[arg(long, env = "JOB_SEARCH_NAMESPACE", default_value = "job-description-namespace")]
    namespace: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "30")]
    request_timeout_secs: u64,
}

#[derive(Args, Clone)]
struct IndexArgs {
    /// Cloud provider for a newly created index
    #[arg(long, default_value = "aws")]
    cloud: String,

    /// Region for a newly created index
    #[arg(long, default_value = "us-east-1")]
    region: String,

    /// Hosted embedding model bound to the index
    #[arg(long, default_value = "llama-text-embed-v2")]
    embed_model: String,

    /// Record field whose text gets embedded
    #[arg(long, default_value = "embed_text")]
    embed_field: String,
}

#[derive(Subcommand)]
enum Command {
    /// Create the index if it does not exist yet.
    CreateIndex {
        #[command(flatten)]
        index: IndexArgs,
    },
    /// Normalize a line-delimited JSON dataset and upsert it in paced batches.
    Ingest {
        /// Dataset file, one JSON object per line.
        #[arg(long)]
        source: PathBuf,
        #[command(flatten)]
        index: IndexArgs,
        /// Skip this many prepared records (resume an interrupted run).
        #[arg(long, default_value = "0")]
        start_offset: usize,
        /// Records per upsert request.
        #[arg(long, default_value = "20")]
        batch_size: usize,
        /// Pause before each batch, in milliseconds.
        #[arg(long, default_value = "1000")]
        pacing_ms: u64,
        /// Retries for a rate-limited or failed batch.
        #[arg(long, default_value = "3")]
        max_retries: u32,
        /// Initial retry backoff, in milliseconds; doubles per retry.
        #[arg(long, default_value = "1000")]
        backoff_ms: u64,
        /// Abort on the first malformed dataset line instead of skipping it.
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    /// Search job ads by free text and/or resume, with optional filters.
    Search {
        /// What kind of job you are looking for.
        #[arg(long)]
        query: Option<String>,
        /// Resume file (.pdf, .docx, .txt, .md) used as query text.
        #[arg(long)]
        resume: Option<PathBuf>,
        /// Number of results.
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
        /// Location filter; repeat for several.
        #[arg(long)]
        location: Vec<String>,
        /// Work type filter; repeat for several.
        #[arg(long)]
        work_type: Vec<String>,
        /// Classification filter; repeat for several.
        #[arg(long)]
        classification: Vec<String>,
        /// Print the result table as JSON instead of job cards.
        #[arg(long, default_value_t = false)]
        json: bool,
        /// Show the full details of this result; also the job --analyse looks at.
        #[arg(long)]
        job_id: Option<String>,
        /// Generate a resume-fit analysis for the selected (default: top) result.
        #[arg(long, default_value_t = false)]
        analyse: bool,
        /// OpenAI API key for --analyse.
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        openai_api_key: Option<String>,
        /// System prompt file for --analyse.
        #[arg(long, requires = "user_prompt")]
        system_prompt: Option<PathBuf>,
        /// User prompt file for --analyse; may use {user_resume} and {job_description}.
        #[arg(long, requires = "system_prompt")]
        user_prompt: Option<PathBuf>,
    },
}

impl IndexArgs {
    fn spec(&self, name: &str) -> IndexSpec {
        let mut spec = IndexSpec::new(name);
        spec.cloud = self.cloud.clone();
        spec.region = self.region.clone();
        spec.embed_model = self.embed_model.clone();
        spec.field_map = [("text".to_string(), self.embed_field.clone())].into();
        spec
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut pinecone_config = PineconeConfig::new(&cli.pinecone_api_key);
    pinecone_config.control_url = cli.pinecone_control_url.clone();
    pinecone_config.request_timeout = Duration::from_secs(cli.request_timeout_secs);
    let control = PineconeClient::new(&pinecone_config)?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        index = %cli.index,
        namespace = %cli.namespace,
        "job-search boot"
    );

    match cli.command {
        Command::CreateIndex { index } => {
            let spec = index.spec(&cli.index);
            ensure_index(&control, &spec, &EnsureOptions::default()).await?;
            println!("index {} is ready", spec.name);
        }
        Command::Ingest {
            source,
            index,
            start_offset,
            batch_size,
            pacing_ms,
            max_retries,
            backoff_ms,
            strict,
        } => {
            let spec = index.spec(&cli.index);
            let job = IngestionJob {
                source: &source,
                load_policy: if strict { LoadPolicy::Abort } else { LoadPolicy::Skip },
                index: &spec,
                ensure: EnsureOptions::default(),
                namespace: &cli.namespace,
                upsert: UpsertOptions {
                    batch_size,
                    pacing_delay: Duration::from_millis(pacing_ms),
                    start_offset,
                    backoff: BackoffPolicy {
                        max_retries,
                        initial_delay: Duration::from_millis(backoff_ms),
                        ..BackoffPolicy::default()
                    },
                },
            };

            match ingest_file(&control, &job).await {
                Ok(summary) => {
                    println!(
                        "{} records upserted in {} batches ({} lines skipped, {} records rejected) at {}",
                        summary.upsert.records_upserted(),
                        summary.upsert.batch_count(),
                        summary.skipped_lines.len(),
                        summary.rejected.len(),
                        Utc::now().to_rfc3339()
                    );
                }
                Err(PipelineError::Upsert(UpsertError::BatchFailed {
                    batch_index,
                    offset,
                    source: cause,
                    report,
                })) => {
                    eprintln!(
                        "batch {} failed after {} records were upserted; rerun with --start-offset {}",
                        batch_index + 1,
                        report.records_upserted(),
                        report.resume_offset()
                    );
                    return Err(anyhow::Error::new(cause)
                        .context(format!("upsert stopped at record offset {offset}")));
                }
                Err(error) => return Err(error.into()),
            }
        }
        Command::Search {
            query,
            resume,
            top_k,
            location,
            work_type,
            classification,
            json,
            job_id,
            analyse,
            openai_api_key,
            system_prompt,
            user_prompt,
        } => {
            let resume_text = match &resume {
                Some(path) => Some(
                    extract_resume_text(path)
                        .with_context(|| format!("reading resume {}", path.display()))?,
                ),
                None => None,
            };

            let Some(query_text) = compose_query_text(resume_text.as_deref(), query.as_deref())
            else {
                bail!("provide --resume and/or --query");
            };

            let filter = Filter::new()
                .with_in(LOCATION_FIELD, location)
                .with_in(WORK_TYPE_FIELD, work_type)
                .with_in(CLASSIFICATION_FIELD, classification);

            let description = control.describe_index(&cli.index).await?;
            let handle = control.connect(&description)?;
            let hits = search(&handle, &cli.namespace, &query_text, top_k, Some(&filter)).await?;

            let selected = select_hit(&hits, job_id.as_deref());
            if let (Some(id), None) = (&job_id, selected) {
                bail!("job {id} is not among the {} results", hits.len());
            }

            let table = to_table(&hits);
            match (json, &job_id) {
                (true, Some(id)) => {
                    println!("{}", serde_json::to_string_pretty(&table.find_row(id))?)
                }
                (true, None) => println!("{}", serde_json::to_string_pretty(&table)?),
                (false, Some(_)) => {
                    if let Some(hit) = selected {
                        print_job_details(&JobListing::from_hit(hit));
                    }
                }
                (false, None) => print_job_cards(&hits),
            }

            if analyse {
                let Some(resume_text) = resume_text else {
                    bail!("--analyse needs --resume");
                };
                let Some(chosen) = selected else {
                    println!("no results to analyse");
                    return Ok(());
                };
                let Some(api_key) = openai_api_key else {
                    bail!("--analyse needs OPENAI_API_KEY or --openai-api-key");
                };

                let prompts = match (&system_prompt, &user_prompt) {
                    (Some(system), Some(user)) => PromptTemplates::from_files(system, user)?,
                    _ => PromptTemplates::default(),
                };
                let analyser = OpenAiFitAnalyser::new(OpenAiConfig::new(api_key), prompts)?;
                let listing = JobListing::from_hit(chosen);
                let job_description = listing.content.clone().unwrap_or_default();

                let analysis = analyser.analyse(&resume_text, &job_description).await?;
                println!(
                    "## Resume fit: {}\n\n{analysis}",
                    listing.title.as_deref().unwrap_or(&listing.id)
                );
            }
        }
    }

    Ok(())
}

fn print_job_cards(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("no matching jobs");
        return;
    }

    for hit in hits {
        let listing = JobListing::from_hit(hit);
        println!("---");
        println!(
            "#### {}  (id={} score={:.4})",
            escape_markdown(listing.title.as_deref().unwrap_or("untitled")),
            listing.id,
            listing.score
        );
        if let Some(salary) = &listing.salary {
            println!("**Salary:** {}", escape_markdown(salary));
        }
        if let Some(location) = &listing.location {
            println!("**Location:** {}", escape_markdown(location));
        }
        for bullet in &listing.bullets {
            println!("- {}", escape_markdown(bullet));
        }
    }
    println!("---");
}

fn print_job_details(listing: &JobListing) {
    println!(
        "## {}  (id={} score={:.4})",
        escape_markdown(listing.title.as_deref().unwrap_or("untitled")),
        listing.id,
        listing.score
    );
    let facts = [
        ("Salary", &listing.salary),
        ("Location", &listing.location),
        ("Work type", &listing.work_type),
        ("Classification", &listing.classification),
    ];
    for (label, value) in facts {
        if let Some(value) = value {
            println!("**{label}:** {}", escape_markdown(value));
        }
    }
    for bullet in &listing.bullets {
        println!("- {}", escape_markdown(bullet));
    }
    println!();
    println!(
        "{}",
        listing
            .content
            .as_deref()
            .map(escape_markdown)
            .unwrap_or_else(|| "no description available".to_string())
    );
}
