use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde_json::json;
use template_job_client::interactive::{self, Prompter};
use template_job_client::preprocess::{
    crop_face_in_background, crop_source, detect_faces, FaceDetector, FaceSelection, SeetaFaceDetector,
};
use template_job_client::presets::DEFAULT_TEMPLATE_ID;
use template_job_client::workflow::FieldOverride;
use template_job_client::{pipeline, presets, ApiClient, AppError, AppResult, Config, RunInputs};
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "jobctl", about = "Run image generation jobs from workflow templates", version)]
struct Cli {
    #[command(flatten)]
    conn: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Override JOB_API_URL
    #[arg(global = true, long)]
    base_url: Option<String>,

    /// Override JOB_API_TOKEN
    #[arg(global = true, long)]
    token: Option<String>,

    /// Override OUTPUT_DIR
    #[arg(global = true, long, value_name = "DIR")]
    output_dir: Option<String>,

    /// Override FACE_MODEL_PATH (SeetaFace frontal model)
    #[arg(global = true, long, value_name = "PATH")]
    face_model: Option<PathBuf>,
}

impl GlobalArgs {
    /// Config and client are only built for commands that talk to the service.
    fn connect(&self) -> AppResult<ApiClient> {
        let mut overrides = HashMap::new();
        if let Some(url) = &self.base_url {
            overrides.insert("JOB_API_URL", url.clone());
        }
        if let Some(token) = &self.token {
            overrides.insert("JOB_API_TOKEN", token.clone());
        }
        if let Some(dir) = &self.output_dir {
            overrides.insert("OUTPUT_DIR", dir.clone());
        }
        let conf = Config::from_env_with(&overrides)?;
        conf.log_summary();
        Ok(ApiClient::new(conf))
    }

    fn detector(&self) -> AppResult<Option<SeetaFaceDetector>> {
        match &self.face_model {
            Some(path) => SeetaFaceDetector::new(path).map(Some),
            None => SeetaFaceDetector::from_env(),
        }
    }

    /// The model is only loaded when a face has to be picked by index.
    fn detector_for(&self, selection: Option<FaceSelection>) -> AppResult<Option<SeetaFaceDetector>> {
        match selection {
            Some(FaceSelection::Index(_)) => self.detector(),
            _ => Ok(None),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload images, bind them into a template and run the job
    Run {
        /// Template (workflow) id
        #[arg(long, default_value = DEFAULT_TEMPLATE_ID)]
        template: String,
        /// Image to upload; repeat in the order the template's image fields expect
        #[arg(long = "image", value_name = "PATH")]
        images: Vec<PathBuf>,
        /// Positive prompt for `prompt`/`text_positive` fields
        #[arg(long, value_name = "TEXT")]
        prompt: Option<String>,
        /// Crop a face out of the first image before upload: a detected
        /// face index or an explicit x,y,w,h box
        #[arg(long, value_name = "INDEX|X,Y,W,H")]
        crop_face: Option<FaceSelection>,
        /// Field overrides as NODE.FIELD=VALUE (repeatable)
        #[arg(long = "set", value_name = "NODE.FIELD=VALUE")]
        sets: Vec<String>,
        /// Upload images concurrently
        #[arg(long)]
        concurrent_uploads: bool,
        /// Print the bound fields instead of submitting
        #[arg(long)]
        dry_run: bool,
    },
    /// Ask for template, images and prompt on the terminal, then run
    Interactive,
    /// Upload a single image and print its resource id
    Upload { path: PathBuf },
    /// Show a template's declared fields
    Template {
        template_id: String,
        /// Output raw JSON instead of pretty lines
        #[arg(long)]
        json: bool,
    },
    /// Job inspection
    Job {
        #[command(subcommand)]
        cmd: JobCmd,
    },
    /// Run the portrait upscale preset on an image
    Upscale {
        path: PathBuf,
        #[arg(long, value_name = "INDEX|X,Y,W,H")]
        crop_face: Option<FaceSelection>,
    },
    /// List the faces detected in an image
    Faces { path: PathBuf },
    /// Crop a face out of an image to a 512x512 file
    Crop {
        path: PathBuf,
        /// Detected face index or an explicit x,y,w,h box
        #[arg(long, value_name = "INDEX|X,Y,W,H")]
        face: FaceSelection,
        #[arg(long, value_name = "PATH", default_value = "cropped_face.jpg")]
        out: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum JobCmd {
    /// Print a job's current status
    Status { job_id: String },
    /// Wait for a job and download its image
    Wait { job_id: String },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    Config::dotenv_load();
    let cli = Cli::parse();

    if let Err(e) = run_cli(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_cli(cli: Cli) -> AppResult<()> {
    let Cli { conn, command } = cli;

    match command {
        Commands::Run {
            template,
            images,
            prompt,
            crop_face,
            sets,
            concurrent_uploads,
            dry_run,
        } => {
            let client = conn.connect()?;
            let mut inputs = RunInputs {
                template_id: template,
                images,
                prompt,
                overrides: FieldOverride::parse_all(&sets)?,
                concurrent_uploads,
            };
            if let Some(selection) = crop_face {
                let detector = conn.detector_for(crop_face)?;
                pipeline::crop_first_image(&mut inputs, selection, as_dyn(&detector)).await?;
            }
            if dry_run {
                let fields = pipeline::plan(&client, &inputs).await?;
                println!("{}", to_pretty(&fields)?);
                return Ok(());
            }
            let path = cancellable(pipeline::run(&client, &inputs)).await?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::Interactive => {
            let client = conn.connect()?;
            let detector = conn.detector()?;
            let mut prompter = Prompter::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout());
            cancellable(interactive::run(&client, as_dyn(&detector), &mut prompter)).await?;
            Ok(())
        }
        Commands::Upload { path } => {
            let id = conn.connect()?.upload(&path).await?;
            println!("{}", id);
            Ok(())
        }
        Commands::Template { template_id, json } => {
            let template = conn.connect()?.fetch_template(&template_id).await?;
            if json {
                let fields: Vec<_> = template
                    .fields
                    .iter()
                    .map(|f| json!({"nodeId": f.node_id, "fieldName": f.field_name, "fieldValue": f.default_value}))
                    .collect();
                println!("{}", to_pretty(&fields)?);
            } else {
                for f in &template.fields {
                    let marker = if f.is_image_slot() { " [image]" } else { "" };
                    println!("{}.{} = {}{}", f.node_id, f.field_name, f.default_value, marker);
                }
            }
            Ok(())
        }
        Commands::Job { cmd } => {
            let client = conn.connect()?;
            match cmd {
                JobCmd::Status { job_id } => {
                    match client.job_status(&job_id).await? {
                        Some(snapshot) => {
                            println!("{}", snapshot.status);
                            for url in snapshot.image_urls() {
                                println!("{}", url);
                            }
                        }
                        None => println!("unknown"),
                    }
                    Ok(())
                }
                JobCmd::Wait { job_id } => {
                    let policy = client.config().poll.clone();
                    let url = cancellable(client.wait_for_job(&job_id, &policy)).await?;
                    let path = client.retrieve(&url).await?;
                    println!("{}", path.display());
                    Ok(())
                }
            }
        }
        Commands::Upscale { path, crop_face } => {
            let client = conn.connect()?;
            let detector = conn.detector_for(crop_face)?;
            let source = match crop_face {
                Some(selection) => crop_source(&path, selection, as_dyn(&detector)).await?,
                None => path,
            };
            let out = cancellable(presets::run_upscale(&client, &source)).await?;
            println!("{}", out.display());
            Ok(())
        }
        Commands::Faces { path } => {
            let detector = conn.detector()?.ok_or_else(|| {
                AppError::Config("face detection needs --face-model or FACE_MODEL_PATH".to_string())
            })?;
            let faces = detect_faces(&path, &detector)?;
            for (idx, f) in faces.iter().enumerate() {
                println!("[{}] {},{},{},{}", idx, f.x, f.y, f.width, f.height);
            }
            Ok(())
        }
        Commands::Crop { path, face, out } => {
            let detector = conn.detector_for(Some(face))?;
            let face = face.resolve(&path, as_dyn(&detector))?;
            let written = crop_face_in_background(path, face, out).await?;
            println!("{}", written.display());
            Ok(())
        }
    }
}

fn as_dyn(detector: &Option<SeetaFaceDetector>) -> Option<&dyn FaceDetector> {
    detector.as_ref().map(|d| d as &dyn FaceDetector)
}

/// Run `fut` until it finishes or the user hits Ctrl-C.
async fn cancellable<T>(fut: impl Future<Output = AppResult<T>>) -> AppResult<T> {
    tokio::select! {
        res = fut => res,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Cancelled");
            std::process::exit(130);
        }
    }
}

fn to_pretty<T: serde::Serialize>(value: &T) -> AppResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| AppError::Io(e.into()))
}
