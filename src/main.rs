//! blobkit -- command-line client for a blob-storage account.
//!
//! A thin caller of the library: every subcommand maps onto one or two
//! library operations.  Credentials and endpoints come from the YAML
//! configuration file and the environment.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::AsyncWriteExt;
use tracing::info;

use blobkit::config::{load_config, Config};
use blobkit::{
    BlobListingDetails, CallOptions, CloudBlobClient, ContainerListingDetails,
    DeleteSnapshotsOption, ListBlobItem,
};

/// Command-line arguments for blobkit.
#[derive(Parser, Debug)]
#[command(name = "blobkit", version, about = "Blob storage command-line client")]
struct Cli {
    /// Path to the YAML configuration file.  Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List containers.
    Containers {
        #[arg(long)]
        prefix: Option<String>,
    },
    /// List blobs in a container.
    List {
        container: String,
        #[arg(long)]
        prefix: Option<String>,
        /// Group names by `/` instead of listing every blob.
        #[arg(long)]
        hierarchical: bool,
    },
    /// Upload a local file.
    Upload {
        container: String,
        blob: String,
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = BlobKind::Block)]
        kind: BlobKind,
    },
    /// Download a blob to a file, or to stdout when no file is given.
    Download {
        container: String,
        blob: String,
        file: Option<PathBuf>,
    },
    /// Delete a blob and its snapshots.
    Delete { container: String, blob: String },
    /// Print a blob's properties and metadata as JSON.
    Stat { container: String, blob: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BlobKind {
    Block,
    Page,
    Append,
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };
    init_logging(&config);
    blobkit::metrics::describe_metrics();

    let client = config.client()?;
    info!(endpoint = %client.base_uri().primary, "client ready");
    run(&client, cli.command).await
}

async fn run(client: &CloudBlobClient, command: Command) -> anyhow::Result<()> {
    let call = CallOptions::new();
    match command {
        Command::Containers { prefix } => {
            let mut token = None;
            loop {
                let page = client
                    .list_containers_segmented(
                        prefix.as_deref(),
                        ContainerListingDetails::None,
                        None,
                        token.as_ref(),
                        &call,
                    )
                    .await?;
                for container in &page.results {
                    println!("{}", container.name);
                }
                token = page.continuation_token;
                if token.is_none() {
                    break;
                }
            }
        }
        Command::List {
            container,
            prefix,
            hierarchical,
        } => {
            let container = client.container_reference(&container);
            let mut token = None;
            loop {
                let page = container
                    .list_blobs_segmented(
                        prefix.as_deref(),
                        !hierarchical,
                        BlobListingDetails::default(),
                        None,
                        token.as_ref(),
                        &call,
                    )
                    .await?;
                for item in &page.results {
                    match item {
                        ListBlobItem::Blob(blob) => {
                            println!("{:>12}  {}", blob.properties.length, blob.name)
                        }
                        ListBlobItem::Prefix(prefix) => println!("{:>12}  {prefix}", "DIR"),
                    }
                }
                token = page.continuation_token;
                if token.is_none() {
                    break;
                }
            }
        }
        Command::Upload {
            container,
            blob,
            file,
            kind,
        } => {
            let container = client.container_reference(&container);
            let mut source = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("opening {}", file.display()))?;
            let written = match kind {
                BlobKind::Block => {
                    container
                        .block_blob_reference(&blob)
                        .upload_from_reader(&mut source, &call)
                        .await?
                }
                BlobKind::Page => {
                    let len = source.metadata().await?.len();
                    let page = blobkit::constants::PAGE_SIZE;
                    let size = len.div_ceil(page) * page;
                    let mut stream = container
                        .page_blob_reference(&blob)
                        .open_write(size, &call)
                        .await?;
                    let written = stream.write_from(&mut source).await?;
                    let padding = vec![0u8; (size - written) as usize];
                    stream.write(&padding).await?;
                    stream.close().await?;
                    written
                }
                BlobKind::Append => {
                    let mut stream = container
                        .append_blob_reference(&blob)
                        .open_write(true, &call)
                        .await?;
                    let written = stream.write_from(&mut source).await?;
                    stream.close().await?;
                    written
                }
            };
            info!(bytes = written, blob = %blob, "upload complete");
        }
        Command::Download {
            container,
            blob,
            file,
        } => {
            let blob = client.container_reference(&container).blob_reference(&blob);
            match file {
                Some(path) => {
                    let mut out = tokio::fs::File::create(&path)
                        .await
                        .with_context(|| format!("creating {}", path.display()))?;
                    blob.download_to_writer(&mut out, &call).await?;
                    out.flush().await?;
                }
                None => {
                    let mut out = tokio::io::stdout();
                    blob.download_to_writer(&mut out, &call).await?;
                    out.flush().await?;
                }
            }
        }
        Command::Delete { container, blob } => {
            let existed = client
                .container_reference(&container)
                .blob_reference(&blob)
                .delete_if_exists(DeleteSnapshotsOption::IncludeSnapshots, &call)
                .await?;
            if !existed {
                anyhow::bail!("blob {container}/{blob} not found");
            }
        }
        Command::Stat { container, blob } => {
            let attributes = client
                .container_reference(&container)
                .blob_reference(&blob)
                .fetch_attributes(&call)
                .await?;
            println!("{}", serde_json::to_string_pretty(&attributes)?);
        }
    }
    Ok(())
}
