//! Command-line client for frostvault.

mod config;
mod session;
#[cfg(test)]
mod test_env;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use frostvault_core::listing::{list_all_multipart_uploads, list_all_parts};
use frostvault_core::{
    ClientConfig, LocalArchive, Transport, UploadCoordinator, UploadId, UploadStrategy, Vault,
    abort_multipart_upload, upload_archive, validate_part_size,
};
use session::SessionFile;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "frostvault")]
#[command(about = "Hash and upload archives to cold storage vaults")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct GlobalArgs {
    /// Config file path
    #[arg(long, global = true, env = config::CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Region (overrides config)
    #[arg(long, global = true)]
    region: Option<String>,

    /// Endpoint URL (overrides config and region)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Args, Clone)]
struct VaultArgs {
    /// Vault name (default: from config)
    #[arg(long)]
    vault: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print size, part layout and hashes of a file without contacting the store
    Hash {
        file: PathBuf,

        /// Part size in bytes
        #[arg(long)]
        part_size: Option<u64>,
    },
    /// Upload a file, as one request or as a multipart upload
    Upload {
        file: PathBuf,

        #[command(flatten)]
        vault: VaultArgs,

        /// Archive description
        #[arg(long)]
        description: Option<String>,

        /// Part size in bytes for multipart uploads
        #[arg(long)]
        part_size: Option<u64>,

        /// Parts uploaded concurrently
        #[arg(long)]
        parallel: Option<usize>,

        /// Use a multipart upload regardless of file size
        #[arg(long)]
        multipart: bool,

        /// Session file path (default: next to the file)
        #[arg(long)]
        session: Option<PathBuf>,
    },
    /// Continue an interrupted multipart upload from its session file
    Resume {
        file: PathBuf,

        /// Session file path (default: next to the file)
        #[arg(long)]
        session: Option<PathBuf>,

        /// Parts uploaded concurrently
        #[arg(long)]
        parallel: Option<usize>,

        /// Trust the session file instead of asking the store which parts it holds
        #[arg(long)]
        no_reconcile: bool,
    },
    /// Abort a multipart upload, by id or through a session file
    Abort {
        /// File whose session should be aborted
        file: Option<PathBuf>,

        /// Upload id to abort
        #[arg(long, conflicts_with = "file")]
        upload_id: Option<String>,

        #[command(flatten)]
        vault: VaultArgs,

        /// Session file path (default: next to the file)
        #[arg(long)]
        session: Option<PathBuf>,
    },
    /// List in-progress multipart uploads
    Uploads {
        #[command(flatten)]
        vault: VaultArgs,
    },
    /// List the parts the store holds for an upload
    Parts {
        upload_id: String,

        #[command(flatten)]
        vault: VaultArgs,
    },
    /// Print the effective configuration with secrets masked
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli { global, command } = Cli::parse();
    init_tracing(global.verbose);

    match command {
        Commands::Hash { file, part_size } => handle_hash(&global, &file, part_size).await,
        Commands::Upload {
            file,
            vault,
            description,
            part_size,
            parallel,
            multipart,
            session,
        } => {
            let options = UploadOptions {
                description,
                part_size,
                parallel,
                multipart,
                session,
            };
            handle_upload(&global, &file, &vault, options).await
        }
        Commands::Resume {
            file,
            session,
            parallel,
            no_reconcile,
        } => handle_resume(&global, &file, session, parallel, !no_reconcile).await,
        Commands::Abort {
            file,
            upload_id,
            vault,
            session,
        } => handle_abort(&global, file, upload_id, &vault, session).await,
        Commands::Uploads { vault } => handle_uploads(&global, &vault).await,
        Commands::Parts { upload_id, vault } => handle_parts(&global, &upload_id, &vault).await,
        Commands::Config => handle_config(&global),
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        1 => "debug".into(),
        _ => "trace".into(),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(global: &GlobalArgs) -> Result<ClientConfig> {
    let path = config::config_path(global.config.as_deref())?;
    let mut config = config::load_client_config(&path)?;
    if let Some(region) = &global.region {
        config.region = region.clone();
    }
    if let Some(endpoint) = &global.endpoint {
        config.endpoint = Some(endpoint.clone());
    }
    tracing::debug!(path = %path.display(), ?config, "loaded configuration");
    Ok(config)
}

fn connect(config: &ClientConfig) -> Result<Arc<dyn Transport>> {
    Ok(Arc::new(config::build_transport(config)?))
}

fn resolve_part_size(config: &ClientConfig, part_size: Option<u64>) -> Result<u64> {
    let size = part_size.unwrap_or(config.upload.part_size);
    Ok(validate_part_size(size)?)
}

async fn open_archive(file: &Path, part_size: u64) -> Result<LocalArchive> {
    LocalArchive::open_with_part_size(file, part_size)
        .await
        .with_context(|| format!("failed to open {}", file.display()))
}

async fn handle_hash(global: &GlobalArgs, file: &Path, part_size: Option<u64>) -> Result<()> {
    let config = load_config(global)?;
    let archive = open_archive(file, resolve_part_size(&config, part_size)?).await?;

    println!("path          {}", archive.path().display());
    println!("size          {}", archive.size());
    println!("part size     {}", archive.part_size());
    println!("parts         {}", archive.part_count());
    println!("content hash  {}", archive.content_hash().await?);
    println!("tree hash     {}", archive.tree_hash().await?);
    for part in archive.parts() {
        println!(
            "part {:<8} {}  {}",
            part.index,
            archive.part_tree_hash(part.index).await?,
            archive.content_range_header(part.index)?
        );
    }
    Ok(())
}

struct UploadOptions {
    description: Option<String>,
    part_size: Option<u64>,
    parallel: Option<usize>,
    multipart: bool,
    session: Option<PathBuf>,
}

async fn handle_upload(
    global: &GlobalArgs,
    file: &Path,
    vault: &VaultArgs,
    options: UploadOptions,
) -> Result<()> {
    let config = load_config(global)?;
    let vault = config.vault(vault.vault.as_deref())?;
    let part_size = resolve_part_size(&config, options.part_size)?;
    let mut archive = open_archive(file, part_size).await?;
    let transport = connect(&config)?;

    let strategy = if options.multipart {
        UploadStrategy::Multipart
    } else {
        UploadStrategy::choose(archive.size(), &config.upload)
    };
    tracing::info!(
        file = %file.display(),
        size = archive.size(),
        vault = %vault,
        ?strategy,
        "uploading archive"
    );

    if strategy == UploadStrategy::SinglePart {
        let id = upload_archive(
            transport.as_ref(),
            &vault,
            &mut archive,
            options.description.as_deref(),
        )
        .await
        .context("upload failed")?;
        println!("{id}");
        return Ok(());
    }

    let mut coordinator = UploadCoordinator::new(transport, vault.clone());
    if let Some(description) = options.description {
        coordinator = coordinator.with_description(description)?;
    }
    let upload_id = coordinator
        .initiate(&mut archive)
        .await
        .context("failed to initiate multipart upload")?;

    let session_path = options
        .session
        .unwrap_or_else(|| session::default_path(archive.path()));
    if let Some(snapshot) = coordinator.session(&archive) {
        session::save(&session_path, &SessionFile::new(&vault, snapshot))?;
    }
    tracing::info!(upload_id = %upload_id, session = %session_path.display(), "session saved");

    let parallel = options.parallel.unwrap_or(config.upload.max_parallel_parts);
    finish_multipart(&coordinator, &mut archive, &vault, &session_path, parallel).await
}

async fn handle_resume(
    global: &GlobalArgs,
    file: &Path,
    session: Option<PathBuf>,
    parallel: Option<usize>,
    reconcile: bool,
) -> Result<()> {
    let config = load_config(global)?;
    let session_path = session.unwrap_or_else(|| session::default_path(file));
    let saved = session::load(&session_path).await?;
    let vault = saved.vault()?;

    let mut archive = open_archive(file, saved.upload.part_size).await?;
    let coordinator =
        UploadCoordinator::resume(connect(&config)?, vault.clone(), &mut archive, &saved.upload)
            .context("session does not match the file")?;

    if reconcile {
        let recovered = coordinator
            .reconcile(&archive)
            .await
            .context("failed to list parts already uploaded")?;
        tracing::info!(recovered = recovered.len(), "reconciled with the store");
    }
    tracing::info!(
        upload_id = %saved.upload.upload_id,
        remaining = coordinator.missing_parts(&archive).len(),
        "resuming upload"
    );

    let parallel = parallel.unwrap_or(config.upload.max_parallel_parts);
    finish_multipart(&coordinator, &mut archive, &vault, &session_path, parallel).await
}

/// Upload the missing parts, checkpointing after each one, then complete.
async fn finish_multipart(
    coordinator: &UploadCoordinator,
    archive: &mut LocalArchive,
    vault: &Vault,
    session_path: &Path,
    parallel: usize,
) -> Result<()> {
    let shared: &LocalArchive = archive;
    let uploaded = coordinator
        .upload_parts_with(shared, parallel, |receipt| {
            if !receipt.recorded {
                return;
            }
            if let Some(snapshot) = coordinator.session(shared) {
                if let Err(err) = session::save(session_path, &SessionFile::new(vault, snapshot)) {
                    tracing::warn!(error = %err, "failed to checkpoint session");
                }
            }
        })
        .await
        .with_context(|| {
            format!(
                "upload interrupted; continue with `frostvault resume {} --session {}`",
                shared.path().display(),
                session_path.display()
            )
        })?;
    tracing::info!(parts = uploaded.len(), "parts uploaded");

    let id = coordinator
        .complete(archive)
        .await
        .context("failed to complete multipart upload")?;
    session::remove(session_path).await?;
    println!("{id}");
    Ok(())
}

async fn handle_abort(
    global: &GlobalArgs,
    file: Option<PathBuf>,
    upload_id: Option<String>,
    vault: &VaultArgs,
    session: Option<PathBuf>,
) -> Result<()> {
    let config = load_config(global)?;
    let transport = connect(&config)?;

    if let Some(upload_id) = upload_id {
        let vault = config.vault(vault.vault.as_deref())?;
        abort_multipart_upload(transport.as_ref(), &vault, &UploadId::new(upload_id))
            .await
            .context("abort failed")?;
        return Ok(());
    }

    let session_path = match (session, file) {
        (Some(path), _) => path,
        (None, Some(file)) => session::default_path(&file),
        (None, None) => anyhow::bail!("give a file, --session or --upload-id"),
    };
    let saved = session::load(&session_path).await?;
    abort_multipart_upload(transport.as_ref(), &saved.vault()?, &saved.upload.upload_id)
        .await
        .context("abort failed")?;
    session::remove(&session_path).await?;
    Ok(())
}

async fn handle_uploads(global: &GlobalArgs, vault: &VaultArgs) -> Result<()> {
    let config = load_config(global)?;
    let vault = config.vault(vault.vault.as_deref())?;
    let transport = connect(&config)?;

    let uploads = list_all_multipart_uploads(transport.as_ref(), &vault).await?;
    for upload in uploads {
        println!(
            "{}  {}  {}  {}",
            upload.multipart_upload_id,
            upload.part_size_in_bytes,
            upload.creation_date.as_deref().unwrap_or("-"),
            upload.archive_description.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn handle_parts(global: &GlobalArgs, upload_id: &str, vault: &VaultArgs) -> Result<()> {
    let config = load_config(global)?;
    let vault = config.vault(vault.vault.as_deref())?;
    let transport = connect(&config)?;

    let parts = list_all_parts(transport.as_ref(), &vault, &UploadId::new(upload_id)).await?;
    for part in parts {
        println!("{}  {}", part.range_in_bytes, part.sha256_tree_hash);
    }
    Ok(())
}

fn handle_config(global: &GlobalArgs) -> Result<()> {
    let config = load_config(global)?;
    print!("{}", config::render_redacted(&config)?);
    Ok(())
}
