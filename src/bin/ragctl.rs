use clap::{Parser, Subcommand};
use serde_json::Value;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use ragbridge::client::ApiClient;
use ragbridge::config;
use ragbridge::history::QueryHistory;
use ragbridge::poller::{self, PollEvent, StatusSource};
use ragbridge::structures::QueryMode;

#[derive(Parser, Debug)]
#[command(name = "ragctl")]
#[command(about = "Console for the ragbridge gateway")]
struct Args {
    /// Gateway base URL
    #[arg(short, long, default_value = config::DEFAULT_SERVER_URL)]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check gateway and engine health
    Health,
    /// List knowledge bases
    Kbs,
    /// Create a knowledge base
    CreateKb {
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// List files in a knowledge base
    Files {
        #[arg(short, long, default_value = config::DEFAULT_KNOWLEDGE_BASE)]
        kb: String,
    },
    /// Upload one or more documents
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(short, long, default_value = config::DEFAULT_KNOWLEDGE_BASE)]
        kb: String,
    },
    /// Start ingesting an uploaded document
    Parse {
        filename: String,
        #[arg(short, long, default_value = config::DEFAULT_KNOWLEDGE_BASE)]
        kb: String,
        /// Keep watching progress until ingestion finishes
        #[arg(short, long)]
        watch: bool,
    },
    /// Watch ingestion progress for a file
    Watch { file_key: String },
    /// Show the tracked status of a file
    Status { file_key: String },
    /// Reset a file back to uploaded
    Reset { file_key: String },
    /// Reset every tracked file
    ResetAll,
    /// Delete a file and its stored upload
    Delete { file_key: String },
    /// Run a retrieval query
    Query {
        text: String,
        #[arg(short, long, value_enum, default_value_t = QueryMode::Hybrid)]
        mode: QueryMode,
        #[arg(short, long, default_value = config::DEFAULT_KNOWLEDGE_BASE)]
        kb: String,
    },
    /// Interactive query console
    Console {
        #[arg(short, long, default_value = config::DEFAULT_KNOWLEDGE_BASE)]
        kb: String,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let client = match ApiClient::new(&args.server) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(args.command, client).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run(command: Command, client: ApiClient) -> Result<(), String> {
    match command {
        Command::Health => {
            let body = client.health().await?;
            println!(
                "Gateway: {}",
                body.get("status").and_then(Value::as_str).unwrap_or("?")
            );
            println!(
                "Engine:  {}",
                body.get("engine").and_then(Value::as_str).unwrap_or("?")
            );
            println!(
                "KBs:     {}",
                body.get("knowledge_bases").and_then(Value::as_u64).unwrap_or(0)
            );
            println!(
                "Files:   {}",
                body.get("files").and_then(Value::as_u64).unwrap_or(0)
            );
        }
        Command::Kbs => {
            let kbs = client.list_knowledge_bases().await?;
            if kbs.is_empty() {
                println!("(no knowledge bases)");
            }
            for kb in kbs {
                let name = kb.get("name").and_then(Value::as_str).unwrap_or("?");
                let files = kb.get("files").and_then(Value::as_u64).unwrap_or(0);
                let desc = kb.get("description").and_then(Value::as_str).unwrap_or("");
                if desc.is_empty() {
                    println!("{:<24} {:>4} files", name, files);
                } else {
                    println!("{:<24} {:>4} files  {}", name, files, desc);
                }
            }
        }
        Command::CreateKb { name, description } => {
            client.create_knowledge_base(&name, &description).await?;
            println!("✅ Created knowledge base '{}'", name);
        }
        Command::Files { kb } => {
            let files = client.list_files(&kb).await?;
            print_file_table(&kb, &files);
        }
        Command::Upload { paths, kb } => {
            let report = client.upload(&kb, &paths).await?;
            print_upload_report(&report);
        }
        Command::Parse { filename, kb, watch } => {
            let body = client.start_parse(&filename, &kb).await?;
            println!(
                "{}",
                body.get("message").and_then(Value::as_str).unwrap_or("started")
            );
            if watch {
                if let Some(file_key) = body.get("file_key").and_then(Value::as_str) {
                    watch_file(&client, file_key).await?;
                }
            }
        }
        Command::Watch { file_key } => {
            watch_file(&client, &file_key).await?;
        }
        Command::Status { file_key } => {
            let body = client.file_details(&file_key).await?;
            println!(
                "File:     {}",
                body.get("filename").and_then(Value::as_str).unwrap_or("?")
            );
            println!(
                "Key:      {}",
                body.get("safe_filename").and_then(Value::as_str).unwrap_or("?")
            );
            println!(
                "KB:       {}",
                body.get("knowledge_base").and_then(Value::as_str).unwrap_or("?")
            );
            println!(
                "Status:   {}",
                body.get("status").and_then(Value::as_str).unwrap_or("?")
            );
            println!(
                "Progress: {}%",
                body.get("progress").and_then(Value::as_u64).unwrap_or(0)
            );
            if let Some(message) = body.get("message").and_then(Value::as_str) {
                if !message.is_empty() {
                    println!("Message:  {}", message);
                }
            }
            if let Some(error) = body.get("error").and_then(Value::as_str) {
                println!("Error:    {}", error);
            }
        }
        Command::Reset { file_key } => {
            let body = client.reset(&file_key).await?;
            println!(
                "{}",
                body.get("message").and_then(Value::as_str).unwrap_or("reset")
            );
        }
        Command::ResetAll => {
            let body = client.reset_all().await?;
            println!(
                "Reset {} files",
                body.get("reset").and_then(Value::as_u64).unwrap_or(0)
            );
        }
        Command::Delete { file_key } => {
            let body = client.delete(&file_key).await?;
            println!(
                "{}",
                body.get("message").and_then(Value::as_str).unwrap_or("deleted")
            );
        }
        Command::Query { text, mode, kb } => {
            let body = client.query_narrated(&text, mode, &kb).await?;
            println!("{}", render_result(&body));
        }
        Command::Console { kb } => {
            console(&client, &kb).await?;
        }
    }
    Ok(())
}

fn print_file_table(kb: &str, files: &[Value]) {
    if files.is_empty() {
        println!("(no files in '{}')", kb);
    }
    for f in files {
        println!(
            "{:<10} {:>3}%  {:>10}  {}  ({})",
            f.get("status").and_then(Value::as_str).unwrap_or("?"),
            f.get("progress").and_then(Value::as_u64).unwrap_or(0),
            f.get("size").and_then(Value::as_u64).unwrap_or(0),
            f.get("filename").and_then(Value::as_str).unwrap_or("?"),
            f.get("safe_filename").and_then(Value::as_str).unwrap_or("?"),
        );
    }
}

fn print_upload_report(report: &Value) {
    let status = report.get("status").and_then(Value::as_str).unwrap_or("?");
    let count = report
        .get("uploaded_files")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    println!("Upload {}: {} stored", status, count);
    for entry in report.get("files").and_then(Value::as_array).into_iter().flatten() {
        let name = entry.get("filename").and_then(Value::as_str).unwrap_or("?");
        match entry.get("error").and_then(Value::as_str) {
            Some(err) => println!("  ✗ {}: {}", name, err),
            None => println!(
                "  ✓ {} -> {}",
                name,
                entry
                    .get("safe_filename")
                    .and_then(Value::as_str)
                    .unwrap_or("?")
            ),
        }
    }
}

/// The mode command is `:mode` alone or `:mode <name>`; run-together input
/// like `:modehybrid` is not a command.
fn mode_argument(line: &str) -> Option<&str> {
    if line == ":mode" {
        return Some("");
    }
    line.strip_prefix(":mode ")
}

/// First line of a stored answer, shortened for the history listing.
fn preview(result: &str) -> String {
    let line = result.lines().next().unwrap_or("");
    if line.chars().count() > 72 {
        let cut: String = line.chars().take(72).collect();
        format!("{}...", cut)
    } else {
        line.to_string()
    }
}

/// The query response carries the engine's answer verbatim under `result`.
fn render_result(body: &Value) -> String {
    match body.get("result") {
        Some(Value::String(text)) => text.clone(),
        Some(other) => {
            serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string())
        }
        None => body.to_string(),
    }
}

/// Stream poll events for one file until it reaches a terminal state, the
/// poller gives up, or the user interrupts.
async fn watch_file(client: &ApiClient, file_key: &str) -> Result<(), String> {
    let source: Arc<dyn StatusSource> = Arc::new(client.clone());
    let mut handle = poller::watch(source, file_key.to_string());
    println!("👀 Watching {} (ctrl-c to stop)", file_key);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                handle.cancel();
                handle.join().await;
                println!("stopped watching {}", file_key);
                return Ok(());
            }
            event = handle.next_event() => {
                match event {
                    Some(PollEvent::Progress { progress, message }) => {
                        println!("  [{:>3}%] {}", progress, message.as_deref().unwrap_or(""));
                    }
                    Some(PollEvent::Completed) => {
                        println!("✅ Ingestion completed");
                        let mut kb = config::DEFAULT_KNOWLEDGE_BASE.to_string();
                        // pick up the verification note, if the task left one
                        if let Ok(details) = client.file_details(file_key).await {
                            if let Some(note) = details.get("message").and_then(Value::as_str) {
                                if !note.is_empty() {
                                    println!("   {}", note);
                                }
                            }
                            if let Some(name) =
                                details.get("knowledge_base").and_then(Value::as_str)
                            {
                                kb = name.to_string();
                            }
                        }
                        // a finished ingestion refreshes the file list
                        match client.list_files(&kb).await {
                            Ok(files) => {
                                println!("Files in '{}':", kb);
                                print_file_table(&kb, &files);
                            }
                            Err(e) => eprintln!("could not refresh file list: {}", e),
                        }
                        break;
                    }
                    Some(PollEvent::Failed { error }) => {
                        println!("❌ Ingestion failed: {}", error);
                        break;
                    }
                    Some(PollEvent::Reset) => {
                        println!("↩️  File went back to uploaded");
                        break;
                    }
                    Some(PollEvent::TimedOut) => {
                        println!("⏱️  Giving up: status checks kept failing");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
    handle.join().await;
    Ok(())
}

/// Line-based query loop. `:mode`, `:history`, `:clear` and `:quit` are
/// console commands; everything else is sent to the engine.
async fn console(client: &ApiClient, kb: &str) -> Result<(), String> {
    let mut history = QueryHistory::new();
    let mut mode = QueryMode::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("ragbridge console - knowledge base '{}'", kb);
    println!("commands: :mode <naive|local|global|hybrid>, :history, :clear, :quit");
    loop {
        print!("[{}] > ", mode);
        let _ = std::io::stdout().flush();
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => return Err(format!("stdin error: {}", e)),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = mode_argument(line) {
            let wanted = rest.trim();
            match QueryMode::parse(wanted) {
                Some(m) => {
                    mode = m;
                    println!("mode set to {}", mode);
                }
                None => println!(
                    "unknown mode '{}' (expected one of: {})",
                    wanted,
                    QueryMode::NAMES.join(", ")
                ),
            }
            continue;
        }
        match line {
            ":history" => {
                if history.is_empty() {
                    println!("(no queries yet)");
                }
                for entry in history.iter_recent() {
                    println!("  {}  [{}] {}", entry.timestamp, entry.mode, entry.query);
                    println!("      {}", preview(&entry.result));
                }
                continue;
            }
            ":clear" => {
                history.clear();
                println!("history cleared");
                continue;
            }
            ":quit" | ":q" | ":exit" => break,
            _ => {}
        }
        match client.query_narrated(line, mode, kb).await {
            Ok(body) => {
                let rendered = render_result(&body);
                history.push(line, mode.as_str(), &rendered);
                println!("{}", rendered);
            }
            Err(e) => println!("query failed: {}", e),
        }
    }
    Ok(())
}
