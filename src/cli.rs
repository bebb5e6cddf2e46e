use std::cmp;
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;

use atty::Stream;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use termimad::{FmtText, MadSkin, terminal_size};
use tracing_subscriber::EnvFilter;
use wordbook_rs::client::SyncClient;
use wordbook_rs::web::{self, StoreBackend, WebConfig};
use wordbook_rs::{
    MAX_STARS, Word, WordBook, WordBookOverview, WordBookState, WordDraft, export_book,
    import_book,
};

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Parser, Debug)]
#[command(name = "wordbook-rs", about = "Keep vocabulary word books in sync", version)]
pub struct Cli {
    /// Emit JSON instead of human-readable tables.
    #[arg(long, global = true)]
    json: bool,

    /// Base URL of the word-book server.
    #[arg(
        long,
        global = true,
        env = "WORDBOOK_SERVER",
        default_value = "http://127.0.0.1:7000"
    )]
    server: String,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the word-book HTTP server.
    Serve(ServeArgs),
    /// Check that the server answers.
    Ping,
    /// List the server's books, newest first.
    Books,
    /// Operations on a whole book.
    #[command(subcommand)]
    Book(BookCommand),
    /// Operations on a single word of a book.
    #[command(subcommand)]
    Word(WordCommand),
    /// Search a book by word name and remark.
    Search {
        /// Book id.
        book: String,
        /// Words or prefixes to look for.
        query: String,
        /// Maximum number of matches to return.
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Socket address to listen on.
    #[arg(long, env = "WORDBOOK_ADDR", default_value = "127.0.0.1:7000")]
    addr: SocketAddr,
    /// Directory holding the book files.
    #[arg(long, env = "WORDBOOK_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,
    /// Store layout inside the data directory.
    #[arg(long, env = "WORDBOOK_BACKEND", value_enum, default_value_t = StoreBackend::Files)]
    backend: StoreBackend,
    /// Front-end build to serve next to the API.
    #[arg(long, env = "WORDBOOK_STATIC_DIR")]
    static_dir: Option<PathBuf>,
    /// Enable the single-document `/api/state` endpoint over this file.
    #[arg(long, env = "WORDBOOK_LEGACY_STATE")]
    legacy_state: Option<PathBuf>,
    /// Largest accepted request body in bytes.
    #[arg(long, default_value_t = 2 * 1024 * 1024)]
    body_limit: usize,
}

impl From<ServeArgs> for WebConfig {
    fn from(args: ServeArgs) -> Self {
        WebConfig {
            addr: args.addr,
            data_dir: args.data_dir,
            backend: args.backend,
            body_limit: args.body_limit,
            static_dir: args.static_dir,
            legacy_state: args.legacy_state,
        }
    }
}

#[derive(Subcommand, Debug)]
enum BookCommand {
    /// Print a book and its words.
    Show {
        /// Book id.
        id: String,
    },
    /// Create a book from a random sample of another book's words.
    Create {
        /// Id of the book to copy words from.
        template: String,
        /// Name of the new book.
        name: String,
        /// Percentage of the template's words to copy.
        #[arg(short, long, default_value_t = 100.0)]
        ratio: f64,
    },
    /// Delete a book from the server.
    Delete {
        /// Book id.
        id: String,
    },
    /// Save a book to a local file (`.zst` paths are compressed).
    Export {
        /// Book id.
        id: String,
        /// Destination file.
        path: PathBuf,
    },
    /// Replace an existing book with the contents of a local file.
    Import {
        /// Book id to overwrite.
        id: String,
        /// Source file (plain or zstd-compressed JSON).
        path: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum WordCommand {
    /// Add a word, or update the word with the same name.
    Add {
        book: String,
        name: String,
        #[arg(long)]
        remark: Option<String>,
        #[arg(long)]
        example: Option<String>,
        #[arg(long)]
        translation: Option<String>,
    },
    /// Set a word's star rating (0 unstars it).
    Star {
        book: String,
        name: String,
        #[arg(value_parser = clap::value_parser!(u8).range(0..=(MAX_STARS as i64)))]
        stars: u8,
    },
    /// Toggle a word's bookmark.
    Bookmark { book: String, name: String },
    /// Remove a word from a book.
    Delete { book: String, name: String },
}

pub fn run() -> CliResult {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let client = SyncClient::new(cli.server.clone());
    let as_json = cli.json;
    runtime.block_on(async move {
        match cli.command {
            Command::Serve(args) => web::serve(args.into()).await.map_err(Into::into),
            Command::Ping => handle_ping(&client, as_json).await,
            Command::Books => handle_books(&client, as_json).await,
            Command::Book(command) => handle_book(&client, command, as_json).await,
            Command::Word(command) => handle_word(&client, command, as_json).await,
            Command::Search { book, query, limit } => {
                handle_search(&client, &book, &query, limit, as_json).await
            }
        }
    })
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn handle_ping(client: &SyncClient, as_json: bool) -> CliResult {
    let answer = client.ping().await?;
    if as_json {
        println!("{}", json!({ "server": client.base_url(), "reply": answer }));
    } else {
        println!("{} answered {answer}", client.base_url());
    }
    Ok(())
}

async fn handle_books(client: &SyncClient, as_json: bool) -> CliResult {
    let rows = client.list_overviews().await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        print_books_table(&rows);
    }
    Ok(())
}

async fn handle_book(client: &SyncClient, command: BookCommand, as_json: bool) -> CliResult {
    match command {
        BookCommand::Show { id } => {
            let book = client.pull(&id).await?;
            if as_json {
                println!("{}", serde_json::to_string_pretty(&book)?);
            } else {
                print_book(&book);
            }
        }
        BookCommand::Create {
            template,
            name,
            ratio,
        } => {
            let created = client.create(&template, &name, ratio).await?;
            if as_json {
                println!("{}", serde_json::to_string_pretty(&created)?);
            } else {
                println!(
                    "Created \"{}\" ({}) with {} words.",
                    created.name, created.id, created.word_count
                );
            }
        }
        BookCommand::Delete { id } => {
            client.remove(&id).await?;
            if as_json {
                println!("{}", json!({ "deleted": id }));
            } else {
                println!("Deleted {id}.");
            }
        }
        BookCommand::Export { id, path } => {
            let book = client.pull(&id).await?;
            export_book(&book, &path)?;
            if as_json {
                println!(
                    "{}",
                    json!({ "id": id, "path": path.display().to_string(), "words": book.words.len() })
                );
            } else {
                println!("Wrote {} words to {}.", book.words.len(), path.display());
            }
        }
        BookCommand::Import { id, path } => {
            let mut book = import_book(&path)?;
            book.id = id.clone();
            book.bump_version();
            client.push(&book).await?;
            if as_json {
                println!("{}", serde_json::to_string_pretty(&book.overview())?);
            } else {
                println!(
                    "Replaced {id} with {} words from {}.",
                    book.words.len(),
                    path.display()
                );
            }
        }
    }
    Ok(())
}

async fn handle_word(client: &SyncClient, command: WordCommand, as_json: bool) -> CliResult {
    let (book_id, state) = match command {
        WordCommand::Add {
            book,
            name,
            remark,
            example,
            translation,
        } => {
            let draft = WordDraft {
                name,
                remark,
                example,
                translation,
            };
            let state = mutate(client, &book, |state| {
                state
                    .save_word(draft)
                    .map(|_| ())
                    .ok_or_else(|| "word name cannot be empty".to_string())
            })
            .await?;
            (book, state)
        }
        WordCommand::Star { book, name, stars } => {
            let state = mutate(client, &book, |state| {
                select(state, &name)?;
                state.set_current_word_stars(stars);
                Ok(())
            })
            .await?;
            (book, state)
        }
        WordCommand::Bookmark { book, name } => {
            let state = mutate(client, &book, |state| {
                select(state, &name)?;
                state.toggle_current_word_bookmarked();
                Ok(())
            })
            .await?;
            (book, state)
        }
        WordCommand::Delete { book, name } => {
            let state = mutate(client, &book, |state| {
                select(state, &name)?;
                state.delete_current_word();
                Ok(())
            })
            .await?;
            if as_json {
                println!("{}", json!({ "book": book, "deleted": name }));
            } else {
                println!("Deleted \"{name}\" from {book}.");
            }
            return Ok(());
        }
    };

    match state.current_word() {
        Some(word) if as_json => println!("{}", serde_json::to_string_pretty(word)?),
        Some(word) => print_word_card(word),
        None => println!("Book {book_id} has no words."),
    }
    Ok(())
}

async fn handle_search(
    client: &SyncClient,
    book_id: &str,
    query: &str,
    limit: usize,
    as_json: bool,
) -> CliResult {
    if query.trim().is_empty() {
        return Err("Search query cannot be empty".into());
    }
    let limit = cmp::max(1, limit);
    let state = WordBookState::new(client.pull(book_id).await?);
    let matches = state.search(query, limit);

    if as_json {
        let payload = json!({
            "book": book_id,
            "query": query,
            "limit": limit,
            "results": matches,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_words_table(&format!("Matches for \"{query}\""), &matches);
    }
    Ok(())
}

/// Pulls a book, applies one state operation and pushes the result back.
async fn mutate<F>(client: &SyncClient, book_id: &str, apply: F) -> Result<WordBookState, Box<dyn Error>>
where
    F: FnOnce(&mut WordBookState) -> Result<(), String>,
{
    let mut state = WordBookState::new(client.pull(book_id).await?);
    apply(&mut state)?;
    if state.is_dirty() {
        client
            .push_state(&mut state)
            .await
            .map_err(|err| format!("changes to {book_id} were not saved: {err}"))?;
    }
    Ok(state)
}

fn select(state: &mut WordBookState, name: &str) -> Result<(), String> {
    if state.select_by_name(name.trim()) {
        Ok(())
    } else {
        Err(format!("No word named {name:?} in {}", state.book().id))
    }
}

fn format_version(version: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(version)
        .filter(|_| version > 0)
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn star_bar(stars: u8) -> String {
    let filled = stars.min(MAX_STARS) as usize;
    let mut bar = "★".repeat(filled);
    bar.push_str(&"☆".repeat(MAX_STARS as usize - filled));
    bar
}

fn print_books_table(rows: &[WordBookOverview]) {
    if rows.is_empty() {
        println!("No books on the server.");
        return;
    }
    let id_width = rows
        .iter()
        .map(|row| row.id.len())
        .max()
        .unwrap_or(2)
        .max("ID".len());
    let name_width = rows
        .iter()
        .map(|row| row.name.chars().count())
        .max()
        .unwrap_or(4)
        .max("NAME".len());
    println!(
        "{:<id_width$}  {:<name_width$}  {:>5}  {}",
        "ID", "NAME", "WORDS", "UPDATED"
    );
    println!("{:-<id_width$}  {:-<name_width$}  {:->5}  {}", "", "", "", "----------------");
    for row in rows {
        println!(
            "{:<id_width$}  {:<name_width$}  {:>5}  {}",
            row.id,
            row.name,
            row.word_count,
            format_version(row.version)
        );
    }
}

fn print_words_table(title: &str, words: &[&Word]) {
    if words.is_empty() {
        println!("{title}: none.");
        return;
    }
    let width = words
        .iter()
        .map(|word| word.name.chars().count())
        .max()
        .unwrap_or(4)
        .max("WORD".len());
    println!("{title}:");
    println!("{:<width$}  {:<5}  {}", "WORD", "STARS", "REMARK");
    println!("{:-<width$}  {:-<5}  {}", "", "", "------");
    for word in words {
        let marker = if word.bookmarked { " 🔖" } else { "" };
        println!(
            "{:<width$}  {:<5}  {}{marker}",
            word.name,
            star_bar(word.stars),
            word.remark
        );
    }
}

fn print_book(book: &WordBook) {
    println!("Book: {} ({})", book.name, book.id);
    println!("Updated: {}", format_version(book.version));
    let starred = book.words.iter().filter(|word| word.starred).count();
    println!("Words: {} ({starred} starred)", book.words.len());
    let words: Vec<&Word> = book.words.iter().collect();
    println!();
    print_words_table("Words", &words);
}

fn word_markdown(word: &Word) -> String {
    let mut text = format!("## {} {}\n", word.name, star_bar(word.stars));
    if !word.remark.is_empty() {
        text.push_str(&format!("\n*{}*\n", word.remark));
    }
    if !word.example.is_empty() {
        text.push_str(&format!("\n> {}\n", word.example));
    }
    if !word.translation.is_empty() {
        text.push_str(&format!("\n**Translation:** {}\n", word.translation));
    }
    if !word.kinds.is_empty() {
        let kinds: Vec<&str> = word.kinds.iter().map(String::as_str).collect();
        text.push_str(&format!("\n`{}`\n", kinds.join("` `")));
    }
    if word.bookmarked {
        text.push_str("\nBookmarked\n");
    }
    text
}

fn print_word_card(word: &Word) {
    let card = word_markdown(word);
    if stdout_is_tty() {
        let skin = markdown_skin();
        let formatted = FmtText::from(&skin, &card, Some(markdown_width()));
        println!("{formatted}");
    } else {
        println!("{}", card.trim_end());
    }
}

fn stdout_is_tty() -> bool {
    atty::is(Stream::Stdout)
}

fn markdown_width() -> usize {
    let (width, _) = terminal_size();
    width.max(60) as usize
}

fn markdown_skin() -> MadSkin {
    MadSkin::default()
}
