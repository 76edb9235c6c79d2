use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use freesound_uploader::config::{self, bytes_to_rounded_mb, Config, UploadFormConfig};
use freesound_uploader::page;
use freesound_uploader::security::InputValidator;
use freesound_uploader::terminal_view::TerminalView;
use freesound_uploader::uploader::{
    discard_message, DropWatcher, FreesoundClient, QueuedFile, SessionState, SizeIndicator,
    UploadQueue, UploadQueueManager, UploadView,
};

#[derive(Parser)]
#[command(name = "freesound-uploader", version, about = "Queue and upload audio files to Freesound")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue files and upload them in a single request
    Upload(UploadArgs),
    /// Show which files would be queued under a size limit, without uploading
    Check {
        /// Files to check
        files: Vec<PathBuf>,
        /// Combined size limit in bytes
        #[arg(long)]
        max_size: u64,
    },
    /// Inspect or change the saved defaults
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Args)]
struct UploadArgs {
    /// Audio files to queue
    files: Vec<PathBuf>,
    /// Upload page to read the form settings and CSRF token from
    #[arg(long, env = "FREESOUND_UPLOAD_PAGE")]
    page_url: Option<String>,
    /// Post directly to this URL instead of reading the upload page (takes precedence over --page-url)
    #[arg(long, requires_all = ["max_size", "csrf_token"])]
    upload_url: Option<String>,
    /// Combined size limit in bytes (with --upload-url)
    #[arg(long)]
    max_size: Option<u64>,
    /// Limit shown in messages, in MB (defaults to --max-size rounded)
    #[arg(long)]
    max_size_mb: Option<u64>,
    /// CSRF token (with --upload-url)
    #[arg(long, env = "FREESOUND_CSRF_TOKEN")]
    csrf_token: Option<String>,
    /// Value of the `sessionid` cookie of a logged-in session
    #[arg(long, env = "FREESOUND_SESSION_ID")]
    session_cookie: Option<String>,
    /// Directory whose new files are added to the queue until Enter is pressed
    #[arg(long)]
    watch: Option<PathBuf>,
    /// Where to save the page returned after a successful upload
    #[arg(long)]
    output: Option<PathBuf>,
    /// Give up on the request after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Do not ask for confirmation before uploading
    #[arg(long, short)]
    yes: bool,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the saved configuration
    Show,
    /// Restore the defaults, keeping a backup of the current file
    Reset,
    /// Change saved defaults
    Set {
        #[arg(long)]
        page_url: Option<String>,
        #[arg(long)]
        session_cookie: Option<String>,
        #[arg(long)]
        timeout: Option<u64>,
        #[arg(long)]
        confirm: Option<bool>,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        log_level: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let loaded_config = config::load_config();
    let default_level = loaded_config
        .as_ref()
        .map(|c| c.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let app_config = match loaded_config {
        Ok(config) => config,
        Err(e) => {
            log::warn!("Failed to load configuration, using defaults: {}", e);
            Config::default()
        }
    };

    match cli.command {
        Commands::Upload(args) => run_upload(args, app_config).await,
        Commands::Check { files, max_size } => run_check(files, max_size),
        Commands::Config { action } => run_config(action, app_config),
    }
}

fn queued_files(paths: &[PathBuf]) -> Vec<QueuedFile> {
    paths
        .iter()
        .filter_map(|path| {
            if !InputValidator::is_allowed_audio_file(&path.to_string_lossy()) {
                log::warn!(
                    "{} does not look like a supported audio file; the server may reject it",
                    path.display()
                );
            }
            match QueuedFile::from_path(path) {
                Ok(file) => Some(file),
                Err(e) => {
                    log::error!("Skipping {}: {}", path.display(), e);
                    None
                }
            }
        })
        .collect()
}

async fn resolve_form_config(
    args: &UploadArgs,
    app_config: &Config,
    client: &FreesoundClient,
    timeout: Option<Duration>,
) -> anyhow::Result<UploadFormConfig> {
    if let Some(upload_url) = &args.upload_url {
        let max_size = args.max_size.context("--max-size is required with --upload-url")?;
        let csrf_token = args
            .csrf_token
            .as_deref()
            .context("--csrf-token is required with --upload-url")?;

        let mut form = UploadFormConfig::new(upload_url, max_size, csrf_token).with_timeout(timeout);
        if let Some(mb) = args.max_size_mb {
            form.max_upload_size_mb = mb;
        }
        return Ok(form);
    }

    let page_url = match args.page_url.as_ref().or(app_config.page_url.as_ref()) {
        Some(url) => url,
        None => bail!("No upload page configured; pass --page-url or --upload-url"),
    };

    let mut form = page::fetch_upload_config(client, page_url, timeout)
        .await
        .with_context(|| format!("Failed to read upload form from {}", page_url))?;
    if let Some(token) = &args.csrf_token {
        form.csrf_token = token.clone();
    }
    Ok(form)
}

async fn run_upload(args: UploadArgs, app_config: Config) -> anyhow::Result<ExitCode> {
    let timeout = args
        .timeout
        .or(app_config.request_timeout_secs)
        .map(Duration::from_secs);

    let client = FreesoundClient::new(timeout)?
        .with_session_cookie(args.session_cookie.clone().or(app_config.session_cookie.clone()));

    let form = resolve_form_config(&args, &app_config, &client, timeout).await?;
    let output = args.output.clone().or(app_config.output_path.clone());

    let mut manager = match UploadQueueManager::with_client(form, TerminalView::new(output), client) {
        Ok(manager) => manager,
        Err(e) if e.is_permanent() => {
            eprintln!("error: {}", e);
            eprintln!("Check the command line options or run `freesound-uploader config show`.");
            return Ok(ExitCode::from(2));
        }
        Err(e) => return Err(e.into()),
    };

    let report = manager.ingest(queued_files(&args.files));
    log::info!(
        "Queued {} files ({} discarded over the size limit)",
        report.accepted,
        report.discarded
    );

    if let Some(directory) = &args.watch {
        watch_for_drops(&mut manager, directory).await?;
    }

    if app_config.confirm_before_upload && !args.yes && !confirm(manager.queue().len())? {
        println!("Upload cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let cancel = CancellationToken::new();
    let uploading = Arc::new(AtomicBool::new(true));
    register_abort_handler(cancel.clone(), uploading.clone())?;

    let state = manager.submit(&cancel).await;
    uploading.store(false, Ordering::SeqCst);

    Ok(match state {
        SessionState::Succeeded => ExitCode::SUCCESS,
        SessionState::Aborted => ExitCode::from(130),
        _ => ExitCode::FAILURE,
    })
}

/// Feeds files appearing in `directory` to the manager until Enter is pressed.
async fn watch_for_drops<V: UploadView>(
    manager: &mut UploadQueueManager<V>,
    directory: &PathBuf,
) -> anyhow::Result<()> {
    let mut watcher = DropWatcher::watch(directory)
        .with_context(|| format!("Failed to watch {}", directory.display()))?;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    println!(
        "Drop files into {} to queue them. Press Enter to start the upload.",
        directory.display()
    );

    loop {
        tokio::select! {
            batch = watcher.next_batch() => match batch {
                Some(files) => {
                    manager.drag_over();
                    manager.ingest(files);
                }
                None => break,
            },
            _ = stdin.next_line() => {
                let pending = watcher.drain_pending();
                if !pending.is_empty() {
                    manager.ingest(pending);
                }
                break;
            }
        }
    }

    manager.drag_leave();
    Ok(())
}

fn confirm(count: usize) -> anyhow::Result<bool> {
    print!("Upload {} file{}? [y/N] ", count, if count == 1 { "" } else { "s" });
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Ctrl+C aborts a running upload; otherwise it exits.
fn register_abort_handler(cancel: CancellationToken, uploading: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        if uploading.load(Ordering::SeqCst) && !cancel.is_cancelled() {
            log::info!("Received Ctrl+C, aborting upload...");
            cancel.cancel();
        } else {
            std::process::exit(130);
        }
    })
    .context("Error setting Ctrl-C handler")
}

fn run_check(files: Vec<PathBuf>, max_size: u64) -> anyhow::Result<ExitCode> {
    if max_size == 0 {
        bail!("--max-size must be greater than 0");
    }

    let mut queue = UploadQueue::new(max_size);
    let report = queue.ingest(queued_files(&files));

    let mut view = TerminalView::new(None);
    view.set_drag_tip_visible(queue.is_empty());
    view.render_file_list(queue.files());
    view.render_size_indicator(&SizeIndicator::compute(queue.total_size(), max_size));

    if report.discarded > 0 {
        view.show_error(&discard_message(bytes_to_rounded_mb(max_size), report.discarded));
        return Ok(ExitCode::FAILURE);
    }

    Ok(ExitCode::SUCCESS)
}

fn run_config(action: ConfigCommands, mut app_config: Config) -> anyhow::Result<ExitCode> {
    match action {
        ConfigCommands::Show => {
            println!("{}", serde_json::to_string_pretty(&app_config)?);
        }
        ConfigCommands::Reset => {
            config::reset_config()?;
            println!("Configuration reset to defaults.");
        }
        ConfigCommands::Set {
            page_url,
            session_cookie,
            timeout,
            confirm,
            output,
            log_level,
        } => {
            if page_url.is_some() {
                app_config.page_url = page_url;
            }
            if session_cookie.is_some() {
                app_config.session_cookie = session_cookie;
            }
            if timeout.is_some() {
                app_config.request_timeout_secs = timeout;
            }
            if let Some(confirm) = confirm {
                app_config.confirm_before_upload = confirm;
            }
            if output.is_some() {
                app_config.output_path = output;
            }
            if let Some(level) = log_level {
                app_config.log_level = level;
            }
            config::save_config(&app_config)?;
            println!("{}", serde_json::to_string_pretty(&app_config)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}
