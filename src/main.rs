use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use annolens::presentation::{Table, format_time, image_table, palette_table, project_table};
use annolens::render::{LabelFont, RenderStyle};
use annolens::validation::{validate_class_file, validate_directory, validate_image_file};
use annolens::{
    ClassPalette, Config, CreateProject, Renderer, Store, UploadOutcome, ValidationErrors,
    Workbench,
};

#[derive(Parser)]
#[command(name = "annolens")]
#[command(about = "Manage object detection projects and validate their inputs")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Database file (overrides ANNOLENS_DATABASE)
    #[arg(long, global = true, value_name = "FILE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check files without touching the database
    #[command(subcommand)]
    Validate(ValidateCommand),

    /// Create, inspect and delete projects
    #[command(subcommand)]
    Project(ProjectCommand),

    /// Upload, inspect and export images of a project
    #[command(subcommand)]
    Image(ImageCommand),
}

#[derive(Subcommand)]
enum ValidateCommand {
    /// Validate a class file and show the resolved palette
    ClassFile { path: PathBuf },

    /// Validate a single image
    Image { path: PathBuf },

    /// Validate every image below a directory
    Directory { path: PathBuf },
}

#[derive(Subcommand)]
enum ProjectCommand {
    /// Create a project from a model file and a class file
    Create {
        #[arg(long)]
        name: String,

        #[arg(long)]
        creator: String,

        /// Detection model file
        #[arg(long, value_name = "FILE")]
        model: PathBuf,

        /// Class file, one `name[:color]` per line
        #[arg(long, value_name = "FILE")]
        classes: PathBuf,
    },

    /// List all projects
    List,

    /// Show a project and its class palette
    Show { id: i64 },

    /// Delete a project and all of its images
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum ImageCommand {
    /// Upload images into a project and run detection on them
    Upload {
        project: i64,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List the images of a project
    List { project: i64 },

    /// Show the detections of an image
    Show {
        id: i64,

        /// Print detections as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write the processed image as PNG
    Export {
        id: i64,
        out: PathBuf,

        /// Export the original upload instead
        #[arg(long)]
        original: bool,
    },

    /// Delete one or more images
    Delete {
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Process pending images of a project again
    Retry { project: i64 },
}

#[cfg(feature = "rten")]
type Backend = annolens::detection::rten_backend::RtenYoloLoader;

#[cfg(not(feature = "rten"))]
type Backend = no_backend::NoBackend;

#[cfg(not(feature = "rten"))]
mod no_backend {
    use annolens::{Detection, DetectionError, Detector, ModelLoader};
    use image::DynamicImage;

    /// Stand-in used when the binary is built without a model backend.
    #[derive(Debug, Default)]
    pub struct NoBackend;

    pub struct NoModel;

    impl ModelLoader for NoBackend {
        type Model = NoModel;

        fn load(&self, _bytes: &[u8]) -> Result<NoModel, DetectionError> {
            Err(DetectionError::Load(
                "built without a model backend; rebuild with `--features rten`".into(),
            ))
        }
    }

    impl Detector for NoModel {
        fn infer(&self, _image: &DynamicImage) -> Result<Vec<Detection>, DetectionError> {
            Err(DetectionError::Inference("no model backend".into()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::from_env()?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    match cli.command {
        Commands::Validate(command) => validate(command),
        Commands::Project(command) => {
            let workbench = open_workbench(&config).await?;
            let result = project_command(&workbench, command).await;
            workbench.store().close().await?;
            result
        }
        Commands::Image(command) => {
            let workbench = open_workbench(&config).await?;
            let result = image_command(&workbench, command).await;
            workbench.store().close().await?;
            result
        }
    }
}

async fn open_workbench(config: &Config) -> Result<Workbench<Store, Backend>> {
    let store = Store::open(&config.database_path)
        .await
        .with_context(|| format!("opening database {}", config.database_path.display()))?;

    let font = match &config.label_font {
        Some(path) => LabelFont::from_file(path)
            .with_context(|| format!("loading label font {}", path.display()))?,
        None => LabelFont::Builtin,
    };
    let renderer = Renderer::new(RenderStyle::default(), font);
    Ok(Workbench::new(store, Backend::default(), config).with_renderer(renderer))
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn print_errors(label: &str, errors: &ValidationErrors) {
    println!("FAIL {label}");
    for error in errors.iter() {
        println!("     {error}");
    }
}

fn validate(command: ValidateCommand) -> Result<ExitCode> {
    match command {
        ValidateCommand::ClassFile { path } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            match validate_class_file(&bytes) {
                Ok(specs) => {
                    let palette = ClassPalette::resolve(&specs);
                    println!("PASS {} ({} classes)", path.display(), palette.len());
                    let mut table = Table::new(["ID", "CLASS", "COLOR"]);
                    for (id, entry) in palette.entries().iter().enumerate() {
                        table.push_row([id.to_string(), entry.name.clone(), entry.color.to_string()]);
                    }
                    print!("{table}");
                    Ok(ExitCode::SUCCESS)
                }
                Err(errors) => {
                    print_errors(&path.display().to_string(), &errors);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        ValidateCommand::Image { path } => {
            let report = validate_image_file(&path);
            println!("{report}");
            Ok(if report.passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        ValidateCommand::Directory { path } => {
            let report = validate_directory(&path)
                .with_context(|| format!("reading directory {}", path.display()))?;
            for file in &report.files {
                println!("{file}");
            }
            println!("{} images checked, {} failed", report.checked(), report.failed());
            Ok(if report.failed() == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

async fn project_command(workbench: &Workbench<Store, Backend>, command: ProjectCommand) -> Result<ExitCode> {
    match command {
        ProjectCommand::Create {
            name,
            creator,
            model,
            classes,
        } => {
            let request = CreateProject {
                name,
                creator,
                model_file_name: file_name_of(&model),
                model_bytes: std::fs::read(&model)
                    .with_context(|| format!("reading {}", model.display()))?,
                class_file: std::fs::read(&classes)
                    .with_context(|| format!("reading {}", classes.display()))?,
            };
            match workbench.create_project(request).await {
                Ok(project) => {
                    println!("created project {} ({})", project.id, project.name);
                    print!("{}", palette_table(&project));
                    Ok(ExitCode::SUCCESS)
                }
                Err(annolens::Error::Validation(errors)) => {
                    print_errors("project", &errors);
                    Ok(ExitCode::FAILURE)
                }
                Err(err) => Err(err.into()),
            }
        }
        ProjectCommand::List => {
            let projects = workbench.list_projects().await?;
            print!("{}", project_table(&projects));
            Ok(ExitCode::SUCCESS)
        }
        ProjectCommand::Show { id } => {
            let project = workbench.get_project(id).await?;
            println!("project  {} ({})", project.id, project.name);
            println!("creator  {}", project.creator);
            println!("model    {} [{}]", project.model_file_name, project.model_reference);
            println!("created  {}", format_time(project.created_at));
            print!("{}", palette_table(&project));
            Ok(ExitCode::SUCCESS)
        }
        ProjectCommand::Delete { id } => {
            workbench.delete_project(id).await?;
            println!("deleted project {id}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_outcomes(outcomes: &[UploadOutcome]) -> ExitCode {
    let mut failed = false;
    for outcome in outcomes {
        match outcome {
            UploadOutcome::Processed { image, warnings } => {
                println!(
                    "OK   {} -> image {} ({} detections)",
                    image.file_name,
                    image.id,
                    image.detections.len()
                );
                for warning in warnings {
                    println!("     warning: {warning}");
                }
            }
            UploadOutcome::Pending {
                image_id,
                file_name,
                error,
            } => {
                failed = true;
                println!("PEND {file_name} -> image {image_id}: {error}");
            }
            UploadOutcome::Rejected { file_name, errors } => {
                failed = true;
                print_errors(file_name, errors);
            }
        }
    }
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn image_command(workbench: &Workbench<Store, Backend>, command: ImageCommand) -> Result<ExitCode> {
    match command {
        ImageCommand::Upload { project, files } => {
            let mut batch = Vec::with_capacity(files.len());
            for path in &files {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                batch.push((file_name_of(path), bytes));
            }
            let outcomes = workbench.upload_images(project, batch).await?;
            Ok(print_outcomes(&outcomes))
        }
        ImageCommand::List { project } => {
            // Surface a missing project instead of an empty table.
            workbench.get_project(project).await?;
            let images = workbench.list_images(project).await?;
            print!("{}", image_table(&images));
            Ok(ExitCode::SUCCESS)
        }
        ImageCommand::Show { id, json } => {
            let image = workbench.get_image(id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&image.detections)?);
                return Ok(ExitCode::SUCCESS);
            }

            let project = workbench.get_project(image.project_id).await?;
            println!("image    {} ({})", image.id, image.file_name);
            println!("status   {}", image.status());
            println!("uploaded {}", format_time(image.uploaded_at));
            if let Some(processed_at) = image.processed_at {
                println!("processed {}", format_time(processed_at));
            }
            let mut table = Table::new(["#", "CLASS", "CONFIDENCE", "BOX"]);
            for (index, detection) in image.detections.iter().enumerate() {
                let class = project
                    .palette
                    .get(detection.class_id)
                    .map(|entry| entry.name.clone())
                    .unwrap_or_else(|| format!("Class {}", detection.class_id));
                let b = detection.bbox;
                table.push_row([
                    index.to_string(),
                    class,
                    format!("{:.2}", detection.confidence),
                    format!("{:.0},{:.0} {:.0},{:.0}", b.x_min, b.y_min, b.x_max, b.y_max),
                ]);
            }
            print!("{table}");
            Ok(ExitCode::SUCCESS)
        }
        ImageCommand::Export { id, out, original } => {
            let image = workbench.get_image(id).await?;
            let bytes = if original {
                &image.original_bytes
            } else {
                image
                    .processed_bytes
                    .as_ref()
                    .with_context(|| format!("image {id} is still pending; retry it first"))?
            };
            std::fs::write(&out, bytes).with_context(|| format!("writing {}", out.display()))?;
            println!("wrote {}", out.display());
            Ok(ExitCode::SUCCESS)
        }
        ImageCommand::Delete { ids } => {
            let deleted = workbench.delete_images(&ids).await?;
            println!("deleted {deleted} of {} images", ids.len());
            Ok(ExitCode::SUCCESS)
        }
        ImageCommand::Retry { project } => {
            let outcomes = workbench.retry_pending(project).await?;
            if outcomes.is_empty() {
                println!("no pending images");
                return Ok(ExitCode::SUCCESS);
            }
            Ok(print_outcomes(&outcomes))
        }
    }
}
