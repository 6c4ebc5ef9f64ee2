use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

use on_demand_image::{
    logging, probe_dimensions, AttachmentId, EngineKind, Library, ResizeError, Settings,
    SourceStore, TransformRequest,
};

/// On-demand image derivatives with a disk-backed cache
#[derive(Debug, Parser)]
#[command(name = "on-demand-image", version, about)]
struct Cli {
    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Image engine to render with
    #[arg(long, value_enum, global = true)]
    engine: Option<EngineKind>,

    /// Web root public paths are relative to
    #[arg(long, global = true)]
    document_root: Option<PathBuf>,

    /// Attachment catalog database
    #[arg(long, global = true)]
    library: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Add a source image to the catalog and print its id
    Import { path: PathBuf },
    /// Print the public path of a derivative, rendering it if needed
    Resolve(TransformArgs),
    /// Print the operations a derivative would be rendered with
    Plan(TransformArgs),
    /// Print the native size of an attachment
    Probe { id: String },
    /// Point an attachment at a new file and purge its derivatives
    Edit { id: i64, path: PathBuf },
    /// Remove an attachment and purge its derivatives
    Delete { id: i64 },
    /// Purge an attachment's derivatives
    Purge { id: String },
}

#[derive(Debug, Args)]
struct TransformArgs {
    /// Attachment id
    id: String,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    /// fit, exact or crop
    #[arg(long, default_value = "fit")]
    mode: String,
    /// Background color for padding and transparency
    #[arg(long)]
    background: Option<String>,
    /// 0.0 - 1.0, ignored for png
    #[arg(long, default_value_t = on_demand_image::request::DEFAULT_QUALITY)]
    quality: f32,
    /// jpg or png
    #[arg(long, default_value = "jpg")]
    format: String,
    /// Crop anchor, overrides the portrait/landscape default
    #[arg(long)]
    gravity: Option<String>,
}

impl TransformArgs {
    fn request(&self) -> Result<TransformRequest, ResizeError> {
        TransformRequest::parse(
            &self.id,
            self.width,
            self.height,
            &self.mode,
            self.background.as_deref(),
            self.quality,
            &self.format,
            self.gravity.as_deref(),
        )
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, ResizeError> {
    let mut settings = Settings::load()?;
    if let Some(engine) = cli.engine {
        settings.engine = engine;
    }
    if let Some(root) = cli.document_root {
        settings.document_root = root;
    }
    if let Some(library) = cli.library {
        settings.library_path = library;
    }

    let store = settings.store();
    let mut library = Library::open(&settings.library_path)?;
    library.subscribe(Box::new(store.invalidator()));

    match cli.command {
        Command::Import { path } => {
            let path = path
                .canonicalize()
                .map_err(|_| ResizeError::SourceMissing {
                    id: "<new>".to_string(),
                    path: Some(path.clone()),
                })?;
            println!("{}", library.import(&path)?);
        }
        Command::Resolve(args) => {
            // Same contract as a page render: empty output on failure
            let path = match args.request() {
                Ok(request) => store.resolve(&library, &request),
                Err(e) => {
                    tracing::warn!("{e}");
                    String::new()
                }
            };
            println!("{path}");
            if path.is_empty() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Plan(args) => {
            let plan = store.plan(&library, &args.request()?)?;
            match serde_json::to_string_pretty(&plan) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    error!("could not serialize plan: {e}");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Command::Probe { id } => {
            let id = AttachmentId::new(id)?;
            let path = library
                .source_path(&id)?
                .ok_or_else(|| ResizeError::SourceMissing { id: id.to_string(), path: None })?;
            let engine = settings.engine();
            match probe_dimensions(engine.as_ref(), &path) {
                Some(dims) => println!("{}x{}", dims.width, dims.height),
                None => println!("unknown"),
            }
        }
        Command::Edit { id, path } => {
            if !library.edit(id, &path)? {
                error!("no attachment {id}");
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Delete { id } => {
            if !library.delete(id)? {
                error!("no attachment {id}");
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Purge { id } => {
            let report = store.invalidator().purge(&AttachmentId::new(id)?);
            println!("removed {} failed {} swept {}", report.removed, report.failed, report.swept);
        }
    }

    Ok(ExitCode::SUCCESS)
}
