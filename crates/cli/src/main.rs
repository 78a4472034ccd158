use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use collaboration::{
    Collaborators, CommentId, DocumentId, MarkerUpdate, RegionId, StaticIdentity, SyncConfig,
    SyncOutcome, Thread, ThreadId, ThreadState, ThreadSyncController,
};
use document::DocumentDb;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "collab")]
#[command(about = "Block comment threads - headless discussion operations on stored documents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Document database (defaults to the local data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Sync configuration JSON
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Display name for new comments (defaults to $USER)
    #[arg(long, global = true)]
    user: Option<String>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new document
    New {
        /// Document title
        title: String,
    },

    /// List documents
    Documents,

    /// Append a block to a document
    AddBlock {
        document: String,

        /// Block text
        content: String,

        /// Initial class names
        #[arg(long, default_value = "wp-block-paragraph")]
        class: String,
    },

    /// List a document's blocks and the threads bound to them
    Blocks { document: String },

    /// Comment on a block, starting a thread if it has none
    Comment {
        document: String,
        block: String,
        text: String,
    },

    /// Delete one comment from a block's thread
    Delete {
        document: String,
        block: String,
        comment_id: String,
    },

    /// Resolve a block's thread
    Resolve { document: String, block: String },

    /// Reopen a resolved thread (only meaningful with `"resolution": "retain"`)
    Unresolve { document: String, block: String },

    /// Show every thread in a document
    Threads {
        document: String,

        /// Print the stored JSON instead of a listing
        #[arg(long)]
        json: bool,
    },

    /// Show the thread bound to a block
    Show { document: String, block: String },

    /// Write the default sync configuration to a file
    InitConfig { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "collab=debug,collaboration=debug,document=debug"
    } else {
        "collab=info,collaboration=info,document=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let config = match &cli.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };

    if let Commands::InitConfig { path } = &cli.command {
        config.save(path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let db_path = cli.db.clone().unwrap_or_else(document::default_db_path);
    debug!("Opening document database: {:?}", db_path);
    let db = Arc::new(
        DocumentDb::open_or_create(&db_path)
            .with_context(|| format!("opening {}", db_path.display()))?,
    );

    let user = cli
        .user
        .clone()
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "anonymous".to_string());
    let controller = ThreadSyncController::new(
        config,
        Collaborators::new(db.clone(), db.clone(), Arc::new(StaticIdentity::new(user))),
    )?;

    match cli.command {
        Commands::New { title } => {
            let doc = db.create_document(&title)?;
            info!("Created document {}", doc.id);
            println!("{}", doc.id);
        }
        Commands::Documents => {
            for doc in db.list_documents()? {
                println!("{}  {}", doc.id, doc.title);
            }
        }
        Commands::AddBlock {
            document,
            content,
            class,
        } => {
            let block = db.add_block(&document, &content, &class)?;
            println!("{}", block.id);
        }
        Commands::Blocks { document } => blocks_command(&db, &controller, &document).await?,
        Commands::Comment {
            document,
            block,
            text,
        } => {
            let (doc, region) = target(&db, &document, &block)?;
            let outcome = controller.add_comment(&doc, &region, text).await?;
            report(&outcome);
        }
        Commands::Delete {
            document,
            block,
            comment_id,
        } => {
            let (doc, region) = target(&db, &document, &block)?;
            let outcome = controller
                .delete_comment(&doc, &region, CommentId::new(comment_id))
                .await?;
            report(&outcome);
        }
        Commands::Resolve { document, block } => {
            let (doc, region) = target(&db, &document, &block)?;
            let outcome = controller.resolve(&doc, &region).await?;
            report(&outcome);
        }
        Commands::Unresolve { document, block } => {
            let (doc, region) = target(&db, &document, &block)?;
            let outcome = controller.unresolve(&doc, &region).await?;
            report(&outcome);
        }
        Commands::Threads { document, json } => {
            require_document(&db, &document)?;
            let threads = controller.threads(&DocumentId::new(document)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&threads)?);
            } else if threads.is_empty() {
                println!("No threads");
            } else {
                for (id, thread) in threads.iter() {
                    print_thread(id, thread);
                }
            }
        }
        Commands::Show { document, block } => {
            let (doc, region) = target(&db, &document, &block)?;
            match controller.thread_for_region(&doc, &region).await? {
                Some((id, thread)) => print_thread(&id, &thread),
                None => println!("Block {block} has no thread"),
            }
        }
        Commands::InitConfig { .. } => {}
    }
    Ok(())
}

fn require_document(db: &DocumentDb, document: &str) -> Result<()> {
    if db.get_document(document)?.is_none() {
        bail!("No such document: {document}");
    }
    Ok(())
}

fn target(db: &DocumentDb, document: &str, block: &str) -> Result<(DocumentId, RegionId)> {
    require_document(db, document)?;
    match db.get_block(block)? {
        Some(row) if row.document_id == document => {}
        Some(_) => bail!("Block {block} belongs to another document"),
        None => bail!("No such block: {block}"),
    }
    Ok((DocumentId::new(document), RegionId::new(block)))
}

async fn blocks_command(
    db: &DocumentDb,
    controller: &ThreadSyncController,
    document: &str,
) -> Result<()> {
    require_document(db, document)?;
    let doc = DocumentId::new(document);
    for block in db.list_blocks(document)? {
        let bound = controller
            .thread_for_region(&doc, &RegionId::new(block.id.clone()))
            .await;
        let summary = match bound {
            Ok(Some((id, thread))) => format!("thread {id} ({} comments)", thread.comments.len()),
            Ok(None) => "-".to_string(),
            Err(e) => {
                warn!("Cannot read thread of block {}: {}", block.id, e);
                format!("error: {e}")
            }
        };
        println!("{:>3}  {}  {}  [{}]", block.position, block.id, block.content, summary);
    }
    Ok(())
}

fn report(outcome: &SyncOutcome) {
    if outcome.recovered_from_malformed {
        println!("Stored threads were unreadable and have been reset");
    }
    match outcome.marker {
        MarkerUpdate::Attached => println!("Started thread {}", outcome.thread_id),
        MarkerUpdate::Detached => println!("Removed thread {}", outcome.thread_id),
        MarkerUpdate::Skipped => println!(
            "Block is gone; thread {} saved without marker",
            outcome.thread_id
        ),
        MarkerUpdate::Unchanged if !outcome.persisted => println!("Nothing to change"),
        MarkerUpdate::Unchanged => {}
    }
    if let Some(thread) = outcome.thread() {
        print_thread(&outcome.thread_id, thread);
    }
}

fn print_thread(id: &ThreadId, thread: &Thread) {
    let state = match thread.state() {
        ThreadState::Open => "open",
        ThreadState::Resolved => "resolved",
    };
    println!("Thread {id} ({state})");
    for comment in &thread.comments {
        println!(
            "  [{}] {} at {}: {}",
            comment.id,
            comment.author,
            comment.created_at.to_rfc3339(),
            comment.text
        );
    }
}
