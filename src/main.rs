//! Purpose: `snipstore` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Command failures are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Snippet commands go through `api::LocalClient`, or
//! `api::RemoteClient` when `--remote` is given; `serve` is always local.
#![allow(clippy::result_large_err)]

use std::io::{self, IsTerminal, Read};
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueHint};
use clap_complete::Shell;
use serde_json::{Value, json};

mod serve;

use serve::{ServeConfig, serve};
use snipstore::api::{
    Durability, Error, ErrorKind, ListQuery, LocalClient, RemoteClient, Snippet, SnippetDraft,
    SnippetPatch, Sort, SortField, SortOrder, default_data_dir, to_exit_code,
};

#[derive(Parser)]
#[command(
    name = "snipstore",
    version,
    about = "Networked code-snippet record store with a REST + realtime server"
)]
struct Cli {
    /// Data directory (default: $SNIPSTORE_DATA_DIR, else ~/.snipstore)
    #[arg(long, global = true, value_hint = ValueHint::DirPath)]
    dir: Option<PathBuf>,

    /// Base URL of a running server; snippet commands go over HTTP
    #[arg(long, global = true)]
    remote: Option<String>,

    /// Fsync store commits instead of relying on the atomic rename alone
    #[arg(long, global = true)]
    flush: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the REST + realtime server
    Serve(ServeArgs),
    /// List snippets, optionally filtered and sorted
    List(ListArgs),
    /// Show a single snippet
    Show { id: String },
    /// Create a snippet
    Add(AddArgs),
    /// Update fields on an existing snippet
    Edit(EditArgs),
    /// Delete a snippet
    Rm { id: String },
    /// List the distinct language values in the store
    Languages,
    /// Generate shell completions
    Completions { shell: Shell },
}

#[derive(Args)]
struct ServeArgs {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:5000")]
    bind: SocketAddr,

    /// Allowed CORS origin, repeatable (default: $SNIPSTORE_CLIENT_URL,
    /// else http://localhost:3000)
    #[arg(long = "cors-origin")]
    cors_origin: Vec<String>,

    /// Attach diagnostic detail to error responses
    #[arg(long)]
    debug_errors: bool,

    /// Maximum accepted request body size in bytes
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    max_body_bytes: u64,
}

#[derive(Args)]
struct ListArgs {
    /// Free-text filter over name, language, description, and tags
    #[arg(long)]
    search: Option<String>,

    /// Language filter (case-insensitive substring)
    #[arg(long)]
    language: Option<String>,

    /// Sort field: createdAt, updatedAt, name, or language
    #[arg(long = "sort-by", default_value = "createdAt")]
    sort_by: String,

    /// Sort order: asc or desc
    #[arg(long, default_value = "desc")]
    order: String,
}

#[derive(Args)]
struct AddArgs {
    #[arg(long)]
    name: String,

    #[arg(long)]
    language: Option<String>,

    /// Snippet body; falls back to stdin when neither --code nor
    /// --code-file is given and stdin is not a terminal
    #[arg(long)]
    code: Option<String>,

    #[arg(long, conflicts_with = "code", value_hint = ValueHint::FilePath)]
    code_file: Option<PathBuf>,

    #[arg(long)]
    description: Option<String>,

    /// Tag, repeatable; order is preserved
    #[arg(long = "tag")]
    tags: Vec<String>,
}

#[derive(Args)]
struct EditArgs {
    id: String,

    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    language: Option<String>,

    #[arg(long)]
    code: Option<String>,

    #[arg(long, conflicts_with = "code", value_hint = ValueHint::FilePath)]
    code_file: Option<PathBuf>,

    /// New description; pass an empty string to clear it
    #[arg(long)]
    description: Option<String>,

    /// Replacement tag, repeatable
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Remove every tag
    #[arg(long, conflicts_with = "tags")]
    clear_tags: bool,
}

fn main() {
    let exit_code = match run() {
        Ok(()) => 0,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<(), Error> {
    let cli = Cli::parse();
    let data_dir = cli.dir.clone().unwrap_or_else(default_data_dir);
    let durability = if cli.flush {
        Durability::Flush
    } else {
        Durability::Fast
    };

    match cli.command {
        Command::Serve(args) => {
            if cli.remote.is_some() {
                return Err(Error::new(ErrorKind::Validation)
                    .with_message("serve does not take --remote")
                    .with_hint("Run serve on the machine that owns the data directory."));
            }
            run_serve(data_dir, durability, args)
        }
        Command::List(args) => {
            let query = ListQuery {
                search: args.search,
                language: args.language,
                sort: Sort {
                    field: SortField::parse(&args.sort_by)?,
                    order: SortOrder::parse(&args.order)?,
                },
            };
            let snippets = match target(&cli.remote, &data_dir, durability)? {
                Target::Local(client) => client.list_snippets(&query)?,
                Target::Remote(client) => client.list_snippets(&query)?,
            };
            emit(&json!({ "count": snippets.len(), "snippets": snippets }))
        }
        Command::Show { id } => {
            let snippet = match target(&cli.remote, &data_dir, durability)? {
                Target::Local(client) => client.get_snippet(&id)?,
                Target::Remote(client) => client.get_snippet(&id)?,
            };
            emit_snippet(&snippet)
        }
        Command::Add(args) => {
            let draft = draft_from_args(args)?;
            let snippet = match target(&cli.remote, &data_dir, durability)? {
                Target::Local(client) => client.create_snippet(draft)?,
                Target::Remote(client) => client.create_snippet(&draft)?,
            };
            emit_snippet(&snippet)
        }
        Command::Edit(args) => {
            let (id, patch) = patch_from_args(args)?;
            let snippet = match target(&cli.remote, &data_dir, durability)? {
                Target::Local(client) => client.update_snippet(&id, &patch)?,
                Target::Remote(client) => client.update_snippet(&id, &patch)?,
            };
            emit_snippet(&snippet)
        }
        Command::Rm { id } => {
            match target(&cli.remote, &data_dir, durability)? {
                Target::Local(client) => client.delete_snippet(&id)?,
                Target::Remote(client) => client.delete_snippet(&id)?,
            }
            emit(&json!({ "deleted": id }))
        }
        Command::Languages => {
            let languages = match target(&cli.remote, &data_dir, durability)? {
                Target::Local(client) => client.distinct_languages()?,
                Target::Remote(client) => client.distinct_languages()?,
            };
            emit(&json!({ "count": languages.len(), "languages": languages }))
        }
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "snipstore", &mut io::stdout());
            Ok(())
        }
    }
}

enum Target {
    Local(LocalClient),
    Remote(RemoteClient),
}

fn target(
    remote: &Option<String>,
    data_dir: &PathBuf,
    durability: Durability,
) -> Result<Target, Error> {
    match remote {
        Some(base_url) => Ok(Target::Remote(RemoteClient::new(base_url.clone())?)),
        None => Ok(Target::Local(
            LocalClient::new()
                .with_data_dir(data_dir)
                .with_durability(durability),
        )),
    }
}

fn run_serve(data_dir: PathBuf, durability: Durability, args: ServeArgs) -> Result<(), Error> {
    let cors_origins = if args.cors_origin.is_empty() {
        vec![
            std::env::var("SNIPSTORE_CLIENT_URL")
                .ok()
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
        ]
    } else {
        args.cors_origin
    };

    let config = ServeConfig {
        bind: args.bind,
        data_dir,
        cors_origins,
        debug_errors: args.debug_errors,
        max_body_bytes: args.max_body_bytes,
        durability,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to start async runtime")
                .with_source(err)
        })?;
    runtime.block_on(serve(config))
}

fn draft_from_args(args: AddArgs) -> Result<SnippetDraft, Error> {
    let code = read_code(args.code, args.code_file, true)?;
    Ok(SnippetDraft {
        name: Some(args.name),
        language: args.language,
        code,
        description: args.description,
        tags: if args.tags.is_empty() {
            None
        } else {
            Some(args.tags)
        },
    })
}

fn patch_from_args(args: EditArgs) -> Result<(String, SnippetPatch), Error> {
    let code = read_code(args.code, args.code_file, false)?;
    let tags = if args.clear_tags {
        Some(Vec::new())
    } else if args.tags.is_empty() {
        None
    } else {
        Some(args.tags)
    };
    let patch = SnippetPatch {
        name: args.name,
        language: args.language,
        code,
        description: args.description.map(Some),
        tags,
    };
    if patch.is_empty() {
        return Err(Error::new(ErrorKind::Validation)
            .with_message("edit requires at least one field to change")
            .with_hint("Pass --name, --language, --code, --description, or --tag."));
    }
    Ok((args.id, patch))
}

fn read_code(
    code: Option<String>,
    code_file: Option<PathBuf>,
    stdin_fallback: bool,
) -> Result<Option<String>, Error> {
    if let Some(code) = code {
        return Ok(Some(code));
    }
    if let Some(path) = code_file {
        let code = std::fs::read_to_string(&path).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read code file")
                .with_path(&path)
                .with_source(err)
        })?;
        return Ok(Some(code));
    }
    if stdin_fallback && !io::stdin().is_terminal() {
        let mut code = String::new();
        io::stdin().read_to_string(&mut code).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read code from stdin")
                .with_source(err)
        })?;
        if !code.is_empty() {
            return Ok(Some(code));
        }
    }
    Ok(None)
}

fn emit_snippet(snippet: &Snippet) -> Result<(), Error> {
    let value = serde_json::to_value(snippet).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode snippet")
            .with_source(err)
    })?;
    emit(&value)
}

fn emit(value: &Value) -> Result<(), Error> {
    let rendered = serde_json::to_string_pretty(value).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode output")
            .with_source(err)
    })?;
    println!("{rendered}");
    Ok(())
}

fn emit_error(err: &Error) {
    let mut body = serde_json::Map::new();
    body.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    body.insert(
        "message".to_string(),
        json!(err.message().unwrap_or("error")),
    );
    if let Some(field) = err.field() {
        body.insert("field".to_string(), json!(field));
    }
    if let Some(hint) = err.hint() {
        body.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        body.insert("path".to_string(), json!(path.display().to_string()));
    }
    eprintln!("{}", json!({ "error": Value::Object(body) }));
}
