//! shopfloor-cli — terminal frontend for the Shopfloor answer service
//!
//! Talks to a running `shopfloor-server` over HTTP.
//!
//! # Subcommands
//! - `similar <id> [-n <limit>] [--category <c>] [--json]` — events similar to a stored event
//! - `cosine <a> <b>`                                       — pairwise cosine similarity
//! - `ask <question> [--local] [--json]`                    — answer a question
//! - `explain <a> <b> [--local]`                            — similarity plus explanation
//! - `summary [-n <limit>] [--local]`                       — summary of recent events
//! - `status`                                               — show server health

use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8766";
const DEFAULT_LIMIT: usize = 5;

/// Notes are cut to this many characters in text output.
const NOTE_PREVIEW_CHARS: usize = 80;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "shopfloor-cli",
    version,
    about = "Query manufacturing events and ask questions about them"
)]
struct Cli {
    /// Shopfloor HTTP server URL (overrides SHOPFLOOR_HTTP_URL env var)
    #[arg(long, env = "SHOPFLOOR_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Events most similar to a stored event
    Similar {
        /// Reference event id
        id: i64,

        /// Maximum number of results to return
        #[arg(short = 'n', long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,

        /// Restrict results to one event category
        #[arg(long)]
        category: Option<String>,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Cosine similarity between two stored events
    Cosine { a: i64, b: i64 },

    /// Ask a free-text question about the events
    Ask {
        /// Question text; multiple words are joined with spaces
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,

        /// Answer from local arithmetic only, without the language model
        #[arg(long)]
        local: bool,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Similarity score between two events with an explanation
    Explain {
        a: i64,
        b: i64,

        #[arg(long)]
        local: bool,
    },

    /// Summarize the most recent events
    Summary {
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        #[arg(long)]
        local: bool,
    },

    /// Show Shopfloor server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

/// One ranked event from `/events/:id/similar`
#[derive(Debug, Deserialize)]
pub struct SimilarHit {
    pub id: i64,
    pub category: String,
    pub source: String,
    pub notes: String,
    pub timestamp: String,
    pub duration_minutes: f64,
    pub score: f64,
}

#[derive(Debug, Deserialize)]
pub struct SimilarResponse {
    pub reference_id: i64,
    pub results: Vec<SimilarHit>,
    pub count: usize,
    pub took_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct AskResponse {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<String>,
    pub stage: String,
    pub took_ms: Option<u64>,
}

// ============================================================================
// Text Output
// ============================================================================

/// One line per hit: `#id  score  category on machine: note preview`
pub fn format_hit(hit: &SimilarHit) -> String {
    let first_line = hit.notes.lines().next().unwrap_or("");
    let mut preview: String = first_line.chars().take(NOTE_PREVIEW_CHARS).collect();
    if first_line.chars().count() > NOTE_PREVIEW_CHARS {
        preview.push_str("...");
    }
    format!(
        "#{:<6} {:>6.4}  {} on {}: {}",
        hit.id, hit.score, hit.category, hit.source, preview
    )
}

/// Answer text followed by a numbered source list, if any.
pub fn format_answer(answer: &AskResponse) -> String {
    let mut out = answer.answer.trim_end().to_string();
    if !answer.sources.is_empty() {
        out.push_str("\n\nSources:");
        for (i, source) in answer.sources.iter().enumerate() {
            out.push_str(&format!("\n  [{}] {}", i + 1, source));
        }
    }
    out
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Send a request and decode the JSON body, turning error statuses into
/// the server's `error` message.
fn send(req: reqwest::blocking::RequestBuilder, url: &str) -> anyhow::Result<serde_json::Value> {
    let resp = req
        .send()
        .with_context(|| format!("connection failed to {}", url))?;

    let status = resp.status();
    let body: serde_json::Value = resp.json().unwrap_or_default();
    if !status.is_success() {
        let message = body["error"].as_str().unwrap_or("no error message");
        anyhow::bail!("server returned {}: {}", status, message);
    }
    Ok(body)
}

fn do_similar(
    server: &str,
    id: i64,
    limit: usize,
    category: Option<&str>,
    json_output: bool,
) -> anyhow::Result<()> {
    let url = format!("{}/events/{}/similar", server, id);
    let mut query = vec![("limit", limit.to_string())];
    if let Some(c) = category {
        query.push(("category", c.to_string()));
    }

    let body = send(client(30)?.get(&url).query(&query), &url)?;
    if json_output {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let resp: SimilarResponse =
        serde_json::from_value(body).context("failed to parse similar response")?;
    if resp.results.is_empty() {
        eprintln!("No similar events found for event {}", resp.reference_id);
        return Ok(());
    }

    println!("Events similar to #{} ({} found):", resp.reference_id, resp.count);
    for hit in &resp.results {
        println!("{}", format_hit(hit));
    }
    Ok(())
}

fn do_cosine(server: &str, a: i64, b: i64) -> anyhow::Result<()> {
    let url = format!("{}/cosine/{}/{}", server, a, b);
    let body = send(client(30)?.get(&url), &url)?;
    println!(
        "Similarity between #{} and #{}: {:.4}",
        a,
        b,
        body["similarity"].as_f64().unwrap_or_default()
    );
    Ok(())
}

fn do_ask(server: &str, question: &str, local_only: bool, json_output: bool) -> anyhow::Result<()> {
    let url = format!("{}/ask", server);
    let payload = serde_json::json!({
        "question": question,
        "local_only": local_only,
    });

    // generation retries and external lookups can take a while
    let body = send(client(120)?.post(&url).json(&payload), &url)?;
    if json_output {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let answer: AskResponse = serde_json::from_value(body).context("failed to parse answer")?;
    println!("{}", format_answer(&answer));
    Ok(())
}

fn do_explain(server: &str, a: i64, b: i64, local_only: bool) -> anyhow::Result<()> {
    let url = format!("{}/explain", server);
    let payload = serde_json::json!({ "id_a": a, "id_b": b, "local_only": local_only });

    let body = send(client(120)?.post(&url).json(&payload), &url)?;
    println!(
        "Similarity: {:.4}\n\n{}",
        body["similarity"].as_f64().unwrap_or_default(),
        body["explanation"].as_str().unwrap_or("")
    );
    Ok(())
}

fn do_summary(server: &str, limit: Option<usize>, local_only: bool) -> anyhow::Result<()> {
    let url = format!("{}/summary", server);
    let payload = serde_json::json!({ "limit": limit, "local_only": local_only });

    let body = send(client(120)?.post(&url).json(&payload), &url)?;
    println!("{}", body["summary"].as_str().unwrap_or("").trim_end());
    println!();
    println!("{}", body["report"].as_str().unwrap_or("").trim_end());
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);
    let body = send(client(10)?.get(&url), &url)?;

    println!("Shopfloor server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:          {}", body["version"].as_str().unwrap_or("?"));
    println!("Store:            {}", body["store"].as_str().unwrap_or("?"));
    if let Some(pg) = body["postgresql"].as_str() {
        println!("PostgreSQL:       {}", pg);
        println!("pgvector:         {}", body["pgvector"].as_str().unwrap_or("?"));
    }
    if let Some(n) = body["events"].as_i64() {
        println!("Events:           {}", n);
    }
    println!("Generation:       {}", body["generation"].as_str().unwrap_or("?"));
    println!(
        "Rate limit:       {}/{} available per {}s",
        body["rate_limit"]["available"],
        body["rate_limit"]["max_requests"],
        body["rate_limit"]["window_seconds"]
    );
    println!(
        "Cache:            {} entries, {} hits, {} misses, {} fallbacks",
        body["cache"]["entries"],
        body["cache"]["hits"],
        body["cache"]["misses"],
        body["cache"]["fallbacks"]
    );
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Similar { id, limit, category, json } => {
            do_similar(&server, id, limit, category.as_deref(), json)
        }
        Commands::Cosine { a, b } => do_cosine(&server, a, b),
        Commands::Ask { question, local, json } => do_ask(&server, &question.join(" "), local, json),
        Commands::Explain { a, b, local } => do_explain(&server, a, b, local),
        Commands::Summary { limit, local } => do_summary(&server, limit, local),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("shopfloor-cli: {:#}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
