//! Operator command line client for the task lifecycle service.
//!
//! A thin `reqwest`-based wrapper around `taskd`'s HTTP API: each subcommand
//! issues one request and prints the raw JSON response to stdout, or the
//! error body to stderr with a non-zero exit code.

use std::collections::HashMap;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::error;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Parser, Debug)]
#[command(name = "taskctl")]
#[command(about = "Operator command line client for the task lifecycle service", long_about = None)]
struct Cli {
    /// Base API URL (e.g. http://localhost:8080/api/v1).
    #[arg(long = "api-base", env = "TASKD_API_BASE", global = true)]
    api_base: String,

    /// Operator token sent as the `X-Operator-Token` header.
    #[arg(long = "token", env = "TASKD_OPERATOR_TOKEN", global = true)]
    token: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List tasks for a user within a service.
    List {
        #[arg(long)]
        service: String,
        #[arg(long)]
        user: String,
    },
    /// Submit a new task with query-string parameters.
    Submit {
        #[arg(long)]
        service: String,
        #[arg(long)]
        user: String,
        /// Task parameter in key=value form; may be repeated.
        #[arg(long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
    },
    /// Request cancellation of a task.
    Cancel {
        #[arg(long)]
        service: String,
        #[arg(long = "task-id")]
        task_id: String,
        #[arg(long)]
        user: String,
    },
    /// Cancel and delete a task's stored state.
    Delete {
        #[arg(long)]
        service: String,
        #[arg(long = "task-id")]
        task_id: String,
        #[arg(long)]
        user: String,
    },
    /// List users who have submitted tasks to a service.
    Users {
        #[arg(long)]
        service: String,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => Err("parameters must be in key=value format".to_string()),
    }
}

fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .build()
        .context("failed to build HTTP client")
}

async fn print_response(response: reqwest::Response) -> Result<bool> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status.is_success() {
        println!("{body}");
        Ok(true)
    } else {
        eprintln!("request failed ({status}): {body}");
        Ok(false)
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let client = build_client()?;
    let base = cli.api_base.trim_end_matches('/');

    let response = match cli.command {
        Command::List { service, user } => {
            client
                .get(format!("{base}/services/{service}/users/{user}/tasks"))
                .header("X-Operator-Token", &cli.token)
                .send()
                .await?
        }
        Command::Submit { service, user, params } => {
            let query: HashMap<String, String> = params.into_iter().collect();
            client
                .post(format!("{base}/services/{service}/users/{user}/tasks"))
                .header("X-Operator-Token", &cli.token)
                .query(&query)
                .send()
                .await?
        }
        Command::Cancel { service, task_id, user } => {
            client
                .post(format!("{base}/services/{service}/tasks/{task_id}/cancel"))
                .header("X-Operator-Token", &cli.token)
                .query(&[("user_id", user)])
                .send()
                .await?
        }
        Command::Delete { service, task_id, user } => {
            client
                .delete(format!("{base}/services/{service}/tasks/{task_id}"))
                .header("X-Operator-Token", &cli.token)
                .query(&[("user_id", user)])
                .send()
                .await?
        }
        Command::Users { service } => {
            client
                .get(format!("{base}/services/{service}/users"))
                .header("X-Operator-Token", &cli.token)
                .send()
                .await?
        }
    };

    print_response(response).await
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("taskctl=warn")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!(%err, "taskctl request failed");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_key_value_splits_on_first_equals() {
        assert_eq!(
            parse_key_value("input=value=with=equals").unwrap(),
            ("input".to_string(), "value=with=equals".to_string())
        );
    }

    #[test]
    fn parse_key_value_rejects_missing_equals() {
        assert!(parse_key_value("no-equals-sign").is_err());
    }
}
