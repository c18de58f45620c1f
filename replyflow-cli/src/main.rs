//! replyflow-cli: command-line frontend for a running Replyflow server
//!
//! Talks to the server's HTTP API with a blocking client.
//!
//! # Subcommands
//! - `ask <utterance> [--intent <name>] [--param k=v]... [--context <text>] [--json]`
//! - `status`      show server health
//! - `cache stats` show response cache statistics
//! - `cache clear` flush the response cache

use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8780";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "replyflow-cli", version, about = "Ask a Replyflow server and manage its cache")]
struct Cli {
    /// Replyflow HTTP server URL (overrides REPLYFLOW_HTTP_URL env var)
    #[arg(long, env = "REPLYFLOW_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Resolve one utterance and print the reply
    Ask {
        /// What the customer said
        utterance: String,

        /// Intent name detected upstream
        #[arg(long)]
        intent: Option<String>,

        /// Extracted parameter, repeatable (e.g. --param marca=Nike)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Extra context appended to the generation prompt
        #[arg(long)]
        context: Option<String>,

        /// Print the raw JSON result
        #[arg(long)]
        json: bool,
    },

    /// Show Replyflow server status
    Status,

    /// Inspect or flush the response cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Debug, Subcommand)]
enum CacheAction {
    /// Show cache statistics
    Stats,
    /// Remove every cached reply
    Clear,
}

// ============================================================================
// API Response Types
// ============================================================================

/// Body of a successful POST /resolve
#[derive(Debug, Deserialize)]
pub struct ResolveResponse {
    pub text: String,
    pub source: String,
    pub latency_ms: u64,
}

/// Parse `key=value`. The value may itself contain `=`.
pub fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("parameter name is empty in '{}'", raw));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

pub fn build_resolve_body(
    utterance: &str,
    intent: Option<&str>,
    params: &[(String, String)],
    context: Option<&str>,
) -> serde_json::Value {
    let parameters: serde_json::Map<String, serde_json::Value> = params
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();

    serde_json::json!({
        "utterance": utterance,
        "intent": intent,
        "parameters": parameters,
        "context": context,
    })
}

pub fn format_answer(resp: &ResolveResponse) -> String {
    format!("{}\n\n[{} · {} ms]", resp.text, resp.source, resp.latency_ms)
}

pub fn format_cache_stats(stats: &serde_json::Value) -> String {
    let field = |name: &str| stats[name].as_u64().map(|v| v.to_string()).unwrap_or_else(|| "?".to_string());

    let hits = stats["hits"].as_u64().unwrap_or(0);
    let misses = stats["misses"].as_u64().unwrap_or(0);
    let hit_rate = if hits + misses == 0 {
        "n/a".to_string()
    } else {
        format!("{:.0}%", hits as f64 * 100.0 / (hits + misses) as f64)
    };

    format!(
        "Entries:    {} / {}\nSize:       ~{} bytes\nTTL:        {} s\nHits:       {}\nMisses:     {}\nHit rate:   {}\nEvictions:  {}",
        field("entries"),
        field("max_entries"),
        field("approx_bytes"),
        field("ttl_seconds"),
        hits,
        misses,
        hit_rate,
        field("evictions"),
    )
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout: Duration) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder().timeout(timeout).build()?)
}

/// Turn a non-2xx response into an error carrying the server's message.
fn check(resp: reqwest::blocking::Response) -> anyhow::Result<reqwest::blocking::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["error"].as_str().map(str::to_string))
        .unwrap_or(body);
    bail!("server returned {}: {}", status, message)
}

fn do_ask(
    server: &str,
    utterance: &str,
    intent: Option<&str>,
    params: &[(String, String)],
    context: Option<&str>,
    json_output: bool,
) -> anyhow::Result<()> {
    let url = format!("{}/resolve", server);
    let body = build_resolve_body(utterance, intent, params, context);

    let resp = client(Duration::from_secs(30))?
        .post(&url)
        .json(&body)
        .send()
        .with_context(|| format!("connection failed to {}", url))?;
    let resp = check(resp)?;

    if json_output {
        let raw: serde_json::Value = resp.json().context("failed to parse resolve response")?;
        println!("{}", serde_json::to_string_pretty(&raw)?);
    } else {
        let answer: ResolveResponse = resp.json().context("failed to parse resolve response")?;
        println!("{}", format_answer(&answer));
    }

    Ok(())
}

fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);
    let resp = client(Duration::from_secs(10))?
        .get(&url)
        .send()
        .with_context(|| format!("cannot reach {}", url))?;
    let body: serde_json::Value = check(resp)?.json().unwrap_or_default();

    println!("Replyflow server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:          {}", body["version"].as_str().unwrap_or("?"));
    println!("Generation:       {}", body["generation"].as_str().unwrap_or("?"));
    println!("Knowledge:        {} entries", body["knowledge_entries"].as_u64().unwrap_or(0));
    println!("Cache:            {} entries", body["cache_entries"].as_u64().unwrap_or(0));

    Ok(())
}

fn do_cache(server: &str, action: CacheAction) -> anyhow::Result<()> {
    let client = client(Duration::from_secs(10))?;

    match action {
        CacheAction::Stats => {
            let url = format!("{}/cache/stats", server);
            let resp = client.get(&url).send().with_context(|| format!("cannot reach {}", url))?;
            let stats: serde_json::Value = check(resp)?.json().context("failed to parse cache stats")?;
            println!("{}", format_cache_stats(&stats));
        }
        CacheAction::Clear => {
            let url = format!("{}/cache", server);
            let resp = client.delete(&url).send().with_context(|| format!("cannot reach {}", url))?;
            let body: serde_json::Value = check(resp)?.json().unwrap_or_default();
            println!("Cleared {} cached replies", body["cleared"].as_u64().unwrap_or(0));
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Ask {
            utterance,
            intent,
            params,
            context,
            json,
        } => do_ask(&server, &utterance, intent.as_deref(), &params, context.as_deref(), json),
        Commands::Status => do_status(&server),
        Commands::Cache { action } => do_cache(&server, action),
    };

    if let Err(e) = result {
        eprintln!("replyflow-cli: {:#}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
