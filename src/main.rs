use argh::FromArgs;
use kornia_caption::{
    BlipModel, Captioner, ModelConfig, ReportFormat, Reporter, Resolver, RunStatus, StdinPrompt,
    samples::{DEFAULT_IMAGES_DIR, read_source_list},
};
use std::{
    path::PathBuf,
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

#[derive(FromArgs)]
/// Generate captions for images using BLIP, with no arguments captions the sample images.
struct Args {
    /// path or url of the image to caption
    #[argh(positional)]
    image_path: Option<String>,

    /// prompt for images until 'q' is entered
    #[argh(switch, short = 'i')]
    interactive: bool,

    /// file with one image path or url per line
    #[argh(option, short = 'l')]
    list: Option<PathBuf>,

    /// directory with the sample images for the demo
    #[argh(option, default = "PathBuf::from(DEFAULT_IMAGES_DIR)")]
    images_dir: PathBuf,

    /// print results as json lines
    #[argh(switch)]
    json: bool,

    /// run on the cpu even if an accelerator is available
    #[argh(switch)]
    cpu: bool,

    /// the hugging face model id
    #[argh(option)]
    model_id: Option<String>,

    /// the model revision holding the safetensors weights
    #[argh(option)]
    revision: Option<String>,

    /// local safetensors weights instead of the hub download
    #[argh(option)]
    weights: Option<PathBuf>,

    /// local tokenizer.json instead of the hub download
    #[argh(option)]
    tokenizer: Option<PathBuf>,
}

impl Args {
    fn model_config(&self) -> ModelConfig {
        let defaults = ModelConfig::default();
        ModelConfig {
            model_id: self.model_id.clone().unwrap_or(defaults.model_id),
            revision: self.revision.clone().unwrap_or(defaults.revision),
            weights: self.weights.clone(),
            tokenizer: self.tokenizer.clone(),
            force_cpu: self.cpu,
        }
    }
}

fn run(args: Args) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let format = if args.json {
        ReportFormat::Json
    } else {
        ReportFormat::Text
    };
    let mut reporter = Reporter::stdout(format);

    reporter.info("🎯 BLIP Image Captioning Tool");
    reporter.info("📥 Loading BLIP model...");

    let model = match BlipModel::load(&args.model_config()) {
        Ok(model) => model,
        Err(e) => {
            log::error!("Failed to load the model: {e}");
            reporter.warning(&format!("Failed to load the model: {e}"));
            return Ok(ExitCode::FAILURE);
        }
    };

    let mut captioner = Captioner::new(model, Resolver::http()?);

    // create a cancel token, checked between images and after a single caption
    let cancel_token = Arc::new(AtomicBool::new(false));

    ctrlc::set_handler({
        let cancel_token = cancel_token.clone();
        move || {
            log::debug!("Received Ctrl-C signal");
            cancel_token.store(true, Ordering::SeqCst);
        }
    })?;

    if args.interactive {
        let mut prompt = StdinPrompt::spawn(cancel_token.clone());
        captioner.run_interactive(&mut prompt, &mut reporter, &cancel_token);
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(image_path) = &args.image_path {
        let report = captioner.run_single(image_path, &mut reporter, &cancel_token);
        if report.status() == RunStatus::Failed {
            reporter.warning("File analysis failed!");
            return Ok(ExitCode::FAILURE);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let report = match &args.list {
        Some(list) => {
            let inputs = read_source_list(list)?;
            log::info!("Processing {} images from {}", inputs.len(), list.display());
            captioner.run_batch(&inputs, &mut reporter, &cancel_token)
        }
        None => captioner.run_demo(&args.images_dir, &mut reporter, &cancel_token),
    };

    // an interrupted run exits like a finished interactive session
    if report.status() == RunStatus::Failed {
        reporter.warning("No image could be loaded!");
        return Ok(ExitCode::FAILURE);
    }

    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Args = argh::from_env();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            log::error!("Unexpected error: {e}");
            eprintln!("❌ Unexpected error: {e}");
            ExitCode::FAILURE
        }
    }
}
