use kapros_core::{
    config::Config,
    crop::{CropRegion, CropUnit},
    init,
    source::{ImageSource, LoadedImage},
    CropRasterizer, DisplayedImage, Kapros, Model, Settings,
};
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Override the generation service URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Log more (repeat for debug output)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crop an image and write the JPEG
    Crop {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        crop: CropArgs,
        /// Output file (defaults to <input>-crop.jpg)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Crop an image and run it through a model
    Generate {
        /// face2comic or comic2face (defaults to the saved model)
        #[arg(short, long)]
        model: Option<Model>,
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        crop: CropArgs,
        /// Output file for the result (defaults to <input>-<model>.<ext>)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Also keep the uploaded crop at this path
        #[arg(long)]
        save_crop: Option<PathBuf>,
    },
    /// Show whether models are ready
    Status {
        /// Only this model
        model: Option<Model>,
    },
    /// Ask the service to load a model
    Setup { model: Model },
    /// List the models the service exposes
    Models,
    /// Show or change saved settings
    Settings {
        /// Default model
        #[arg(long)]
        model: Option<Model>,
        /// Default output directory
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Default service URL (empty string clears it)
        #[arg(long = "set-api-url")]
        api_url: Option<String>,
    },
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Image file (JPEG, PNG or GIF)
    #[arg(required_unless_present = "paste")]
    image: Option<PathBuf>,

    /// Take the image from the clipboard instead of a file
    #[arg(short, long, default_value_t = false, conflicts_with = "image")]
    paste: bool,
}

#[derive(Args, Debug)]
struct CropArgs {
    /// Unit of the crop values: % or px
    #[arg(long, default_value = "%")]
    unit: CropUnit,

    /// Crop as X,Y,WIDTH,HEIGHT in the chosen unit (defaults to a centered 90% square)
    #[arg(long, value_delimiter = ',', num_args = 4, allow_negative_numbers = true)]
    region: Option<Vec<f64>>,

    /// Size the crop was drawn against, as WIDTHxHEIGHT (defaults to the natural size)
    #[arg(long, value_parser = parse_size)]
    rendered: Option<(f64, f64)>,
}

impl CropArgs {
    fn displayed(&self, loaded: LoadedImage) -> DisplayedImage {
        match self.rendered {
            Some((w, h)) => loaded.display_at(w, h),
            None => loaded.display_natural(),
        }
    }

    fn region(&self, displayed: &DisplayedImage) -> Result<CropRegion> {
        match self.region.as_deref() {
            Some(&[x, y, width, height]) => Ok(CropRegion { unit: self.unit, x, y, width, height }),
            Some(other) => bail!("--region needs 4 values, got {}", other.len()),
            None => {
                let (w, h) = displayed.rendered_size();
                Ok(CropRegion::default_square(w, h)?)
            }
        }
    }
}

fn parse_size(s: &str) -> std::result::Result<(f64, f64), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
    let w: f64 = w.trim().parse().map_err(|_| format!("invalid width '{}'", w))?;
    let h: f64 = h.trim().parse().map_err(|_| format!("invalid height '{}'", h))?;
    Ok((w, h))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup
    init();
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut settings = Settings::load();
    let api_url = cli.api_url.as_deref();

    match cli.command {
        Command::Crop { input, crop, output } => {
            let (loaded, stem) = load_input(&input)?;
            let displayed = crop.displayed(loaded);
            let region = crop.region(&displayed)?;

            let rasterizer = CropRasterizer::default();
            let cropped = rasterizer
                .rasterize(&displayed, &region)
                .context("Failed to crop image")?;

            let path = output.unwrap_or_else(|| default_output(&settings, &format!("{}-crop.jpg", stem)));
            cropped.save(&path).with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Cropped {}x{} -> {}", cropped.width, cropped.height, path.display());
        }
        Command::Generate { model, input, crop, output, save_crop } => {
            let model = model.unwrap_or(settings.model);
            let (loaded, stem) = load_input(&input)?;
            let displayed = crop.displayed(loaded);
            let region = crop.region(&displayed)?;

            let app = Kapros::with_config(build_config(api_url, &settings)?)
                .context("Failed to set up generation client")?;

            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::default_spinner()
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                    .template("{spinner:.green} {msg}")?
            );
            spinner.set_message(format!("Generating with {}...", model));
            spinner.enable_steady_tick(Duration::from_millis(100));

            let result = app.crop_and_generate(model, Arc::new(displayed), region).await;
            spinner.finish_and_clear();

            let (cropped, generated) = result.with_context(|| format!("{} failed. Please try again", model))?;

            if let Some(path) = save_crop {
                cropped.save(&path).with_context(|| format!("Failed to write {}", path.display()))?;
                println!("Crop {}x{} -> {}", cropped.width, cropped.height, path.display());
            }

            let path = output.unwrap_or_else(|| {
                default_output(&settings, &format!("{}-{}.{}", stem, model, generated.extension()))
            });
            generated.save(&path).with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{} -> {}", generated.message, path.display());
        }
        Command::Status { model } => {
            let app = Kapros::with_config(build_config(api_url, &settings)?)?;
            let models = model.map(|m| vec![m]).unwrap_or_else(|| Model::ALL.to_vec());
            for model in models {
                match app.status(model).await {
                    Ok(status) => match status.message {
                        Some(msg) => println!("{}: {} ({})", model, status.status, msg),
                        None => println!("{}: {}", model, status.status),
                    },
                    Err(e) => eprintln!("{}: {}", model, e),
                }
            }
        }
        Command::Setup { model } => {
            let app = Kapros::with_config(build_config(api_url, &settings)?)?;
            let response = app.setup(model).await.with_context(|| format!("Failed to set up {}", model))?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Models => {
            let app = Kapros::with_config(build_config(api_url, &settings)?)?;
            let response = app.models().await.context("Failed to list models")?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            println!();
            for model in Model::ALL {
                println!("  {:<11} {}", model, model.description());
            }
        }
        Command::Settings { model, output_dir, api_url } => {
            update_settings(&mut settings, model, output_dir, api_url)?;
        }
    }

    Ok(())
}

/// Config precedence: --api-url, then saved settings, then environment.
fn build_config(api_url: Option<&str>, settings: &Settings) -> Result<Config> {
    let config = Config::load().context("Failed to load configuration")?;
    log::debug!("Settings model={}, output_dir={:?}", settings.model, settings.output_dir);
    if let Some(url) = api_url {
        return config.with_api_url(url).context("Invalid --api-url");
    }
    if settings.has_api_url() {
        return config
            .with_api_url(&settings.api_url)
            .context("Invalid api_url in saved settings");
    }
    Ok(config)
}

fn load_input(input: &InputArgs) -> Result<(LoadedImage, String)> {
    if input.paste {
        let loaded = ImageSource::from_clipboard().context("Failed to paste image")?;
        return Ok((loaded, "clipboard".to_string()));
    }
    let Some(path) = input.image.as_deref() else {
        bail!("Pass an image file or --paste");
    };
    let loaded = ImageSource::from_path(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    log::info!("Loaded {} ({}x{})", path.display(), loaded.width(), loaded.height());
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    Ok((loaded, stem))
}

fn default_output(settings: &Settings, file_name: &str) -> PathBuf {
    match &settings.output_dir {
        Some(dir) => dir.join(file_name),
        None => Path::new(file_name).to_path_buf(),
    }
}

fn update_settings(
    settings: &mut Settings,
    model: Option<Model>,
    output_dir: Option<PathBuf>,
    api_url: Option<String>,
) -> Result<()> {
    let changed = model.is_some() || output_dir.is_some() || api_url.is_some();

    if let Some(m) = model {
        settings.model = m;
    }
    if let Some(dir) = output_dir {
        settings.output_dir = Some(dir);
    }
    if let Some(url) = api_url {
        if !url.trim().is_empty() {
            // Validate before persisting
            Config::load()?.with_api_url(&url)?;
        }
        settings.api_url = url.trim().to_string();
    }

    if changed {
        settings.save().context("Failed to save settings")?;
    }

    println!("model:      {}", settings.model);
    println!(
        "output_dir: {}",
        settings.output_dir.as_deref().map(|p| p.display().to_string()).unwrap_or_else(|| ".".into())
    );
    println!(
        "api_url:    {}",
        if settings.has_api_url() { settings.api_url.as_str() } else { "(environment)" }
    );
    if let Some(path) = Settings::config_path() {
        println!("file:       {}", path.display());
    }
    Ok(())
}
