//! Recall CLI - command-line producer for the Recall job engine

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9627";

#[derive(Parser)]
#[command(name = "recall")]
#[command(about = "Recall job engine CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "RECALL_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a new job
    Enqueue {
        /// Job type (e.g. echo, llm, chat, embedding, topic)
        job_type: String,

        /// Payload as JSON string
        #[arg(long, default_value = "{}")]
        payload: String,

        /// Run on the fast path instead of the queue
        #[arg(long)]
        direct: bool,

        /// URL of the captured page
        #[arg(long)]
        page_url: Option<String>,

        /// Title of the captured page
        #[arg(long, requires = "page_url")]
        page_title: Option<String>,

        /// File holding the captured page content
        #[arg(long, requires = "page_url")]
        page_file: Option<std::path::PathBuf>,

        /// Wait for the job to finish
        #[arg(short, long)]
        wait: bool,

        /// How long to wait, in seconds
        #[arg(long, default_value = "60")]
        timeout: u64,
    },

    /// Show one job
    Get {
        /// Job ID
        job_id: String,
    },

    /// List jobs, oldest first
    List {
        /// Only jobs with this effective status
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Delete completed and failed jobs
    Clear,

    /// Check that the worker context answers
    Ping {
        /// Ping timeout in milliseconds
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,
    },
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: serde_json::Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Deserialize)]
struct JobView {
    job_id: String,
    job_type: String,
    effective_status: String,
    progress: u8,
    stage: Option<String>,
    result: Option<serde_json::Value>,
    error: Option<String>,
    dispatch: String,
    created_at: i64,
}

#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Type")]
    job_type: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Progress")]
    progress: String,
    #[tabled(rename = "Stage")]
    stage: String,
    #[tabled(rename = "Created")]
    created: String,
}

impl From<&JobView> for JobRow {
    fn from(job: &JobView) -> Self {
        Self {
            id: job.job_id.clone(),
            job_type: job.job_type.clone(),
            status: colorize_status(&job.effective_status),
            progress: format!("{}%", job.progress),
            stage: job.stage.clone().unwrap_or_else(|| "-".to_string()),
            created: format_time(job.created_at),
        }
    }
}

fn colorize_status(status: &str) -> String {
    match status {
        "completed" => status.green().to_string(),
        "failed" => status.red().to_string(),
        "processing" => status.yellow().to_string(),
        _ => status.to_string(),
    }
}

fn format_time(epoch_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(epoch_ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| epoch_ms.to_string())
}

async fn call_rpc(url: &str, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to connect to daemon")?
        .json()
        .await
        .context("Failed to parse response")?;

    if let Some(error) = response.error {
        anyhow::bail!("RPC error ({}): {}", error.code, error.message);
    }

    response
        .result
        .ok_or_else(|| anyhow::anyhow!("No result in response"))
}

fn print_job(job: &JobView) {
    println!("{}", Table::new(vec![JobRow::from(job)]));
    println!("  {} {}", "Dispatch:".bold(), job.dispatch);
    if let Some(error) = &job.error {
        println!("  {} {}", "Error:".bold(), error.red());
    }
    if let Some(result) = &job.result {
        println!("  {}", "Result:".bold());
        println!(
            "{}",
            serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string())
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Enqueue {
            job_type,
            payload,
            direct,
            page_url,
            page_title,
            page_file,
            wait,
            timeout,
        } => {
            let payload_json: serde_json::Value =
                serde_json::from_str(&payload).context("Invalid JSON payload")?;

            let page_data = match page_url {
                Some(url) => {
                    let content = match page_file {
                        Some(path) => tokio::fs::read_to_string(&path)
                            .await
                            .with_context(|| format!("Failed to read {}", path.display()))?,
                        None => String::new(),
                    };
                    Some(json!({ "url": url, "title": page_title, "content": content }))
                }
                None => None,
            };

            let params = json!({
                "job_type": job_type,
                "payload": payload_json,
                "dispatch": if direct { "direct" } else { "queued" },
                "page_data": page_data,
            });

            let result = call_rpc(&cli.rpc_url, "jobs.enqueue.v1", params).await?;
            let job_id = result["job_id"].as_str().unwrap_or_default().to_string();
            println!("{} {}", "✓ Job enqueued:".green().bold(), job_id);

            if wait {
                println!("{}", "Waiting for completion...".cyan());
                let params = json!({ "job_id": job_id, "timeout_ms": timeout * 1000 });
                let outcome = call_rpc(&cli.rpc_url, "jobs.wait.v1", params).await?;
                if !outcome["done"].as_bool().unwrap_or(false) {
                    println!("{}", format!("Still running after {}s", timeout).yellow());
                }
                let job: JobView = serde_json::from_value(
                    call_rpc(&cli.rpc_url, "jobs.get.v1", json!({ "job_id": job_id })).await?,
                )?;
                print_job(&job);
            }
        }

        Commands::Get { job_id } => {
            let result = call_rpc(&cli.rpc_url, "jobs.get.v1", json!({ "job_id": job_id })).await?;
            let job: JobView = serde_json::from_value(result)?;
            print_job(&job);
        }

        Commands::List { status } => {
            let result = call_rpc(&cli.rpc_url, "jobs.list.v1", json!({ "status": status })).await?;
            let jobs: Vec<JobView> = serde_json::from_value(result["jobs"].clone())?;

            if jobs.is_empty() {
                println!("{}", "No jobs".yellow());
            } else {
                let rows: Vec<JobRow> = jobs.iter().map(JobRow::from).collect();
                println!("{}", Table::new(rows));
            }
        }

        Commands::Clear => {
            let result = call_rpc(&cli.rpc_url, "jobs.clear_completed.v1", json!({})).await?;
            println!(
                "{}",
                format!("✓ {} finished jobs deleted", result["deleted"]).green().bold()
            );
        }

        Commands::Ping { timeout_ms } => {
            match call_rpc(
                &cli.rpc_url,
                "worker.ping.v1",
                json!({ "timeout_ms": timeout_ms }),
            )
            .await
            {
                Ok(pong) => {
                    println!("  {} {}", "RPC URL:".bold(), cli.rpc_url);
                    println!("  {} {}", "Daemon:".bold(), "ONLINE".green());
                    let worker = match (pong["alive"].as_bool(), pong["ready"].as_bool()) {
                        (Some(true), _) => "ALIVE".green(),
                        (_, Some(true)) => "NOT ANSWERING".yellow(),
                        _ => "DOWN".red(),
                    };
                    println!("  {} {}", "Worker:".bold(), worker);
                    println!("  {} {} seconds", "Uptime:".bold(), pong["uptime_seconds"]);
                }
                Err(e) => {
                    println!("  {} {}", "Daemon:".bold(), "OFFLINE".red());
                    println!("  {} {}", "Error:".bold(), e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
