use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use moodlink_core::{
    ClassifierInput, EmotionClassifier, FaceLocator, Frame, Label, LabelEmitter, LabelTable, Normalization,
    OnnxEmotionClassifier, OnnxFaceLocator,
};
use moodlink_hw::link::{detect_usb_port, list_ports};
use moodlink_hw::{Camera, LinkSettings, SerialLink};
use moodlink_relay::{ReadOutcome, RelayReader};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "moodlink", about = "moodlink emotion signaling diagnostics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List V4L2 capture devices
    Devices,
    /// List serial ports
    Ports,
    /// Run face location and emotion classification on an image file
    Classify {
        image: PathBuf,
        /// Directory holding the models and labels.txt
        #[arg(long)]
        model_dir: Option<PathBuf>,
        #[arg(long, default_value = "det_500m.onnx")]
        detector: String,
        #[arg(long, default_value = "emotion.onnx")]
        classifier: String,
        #[arg(long, default_value_t = 0.5)]
        threshold: f32,
        /// Classifier input side length in pixels
        #[arg(long, default_value_t = 48)]
        input_size: u32,
        /// Skip the brightness/contrast normalization
        #[arg(long)]
        raw: bool,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print labels arriving on a serial port
    Listen {
        /// Serial port (default: first USB serial port)
        #[arg(short, long)]
        port: Option<String>,
        #[arg(short, long, default_value_t = 115_200)]
        baud: u32,
    },
    /// Write a label to a serial port in wire format
    Send {
        label: String,
        /// Serial port (default: first USB serial port)
        #[arg(short, long)]
        port: Option<String>,
        #[arg(short, long, default_value_t = 115_200)]
        baud: u32,
        /// Times to send the label
        #[arg(short, long, default_value_t = 1)]
        count: u32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Ports => {
            let ports = list_ports()?;
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for port in ports {
                let kind = if port.usb { "usb" } else { "other" };
                println!("{}  {kind}  {}", port.path, port.product.as_deref().unwrap_or("-"));
            }
        }
        Commands::Classify {
            image,
            model_dir,
            detector,
            classifier,
            threshold,
            input_size,
            raw,
            json,
        } => {
            let model_dir = model_dir.unwrap_or_else(moodlink_core::default_model_dir);
            classify(ClassifyArgs {
                image,
                detector: model_dir.join(detector),
                classifier: model_dir.join(classifier),
                labels: model_dir.join("labels.txt"),
                threshold,
                input_size,
                normalize: !raw,
                json,
            })?;
        }
        Commands::Listen { port, baud } => listen(port, baud)?,
        Commands::Send {
            label,
            port,
            baud,
            count,
        } => send(&label, port, baud, count)?,
    }

    Ok(())
}

struct ClassifyArgs {
    image: PathBuf,
    detector: PathBuf,
    classifier: PathBuf,
    labels: PathBuf,
    threshold: f32,
    input_size: u32,
    normalize: bool,
    json: bool,
}

fn classify(args: ClassifyArgs) -> Result<()> {
    let labels = LabelTable::load(&args.labels).context("loading label table")?;
    let mut locator =
        OnnxFaceLocator::load(&args.detector.to_string_lossy(), args.threshold).context("loading face locator")?;
    let mut classifier = OnnxEmotionClassifier::load(
        &args.classifier.to_string_lossy(),
        ClassifierInput {
            size: args.input_size,
            ..ClassifierInput::default()
        },
    )
    .context("loading emotion classifier")?;
    labels.check_classes(classifier.num_classes())?;

    let gray = image::open(&args.image)
        .with_context(|| format!("reading {}", args.image.display()))?
        .to_luma8();
    let (width, height) = gray.dimensions();
    let mut frame = Frame::new(gray.into_raw(), width, height, 0);
    if args.normalize {
        Normalization::default().apply(&mut frame);
    }

    let regions = locator.locate(&frame)?;
    let mut results = Vec::with_capacity(regions.len());
    for region in &regions {
        let scores = classifier.classify(&frame, region)?;
        let label = labels.resolve(&scores)?;
        results.push(serde_json::json!({
            "region": region,
            "label": label.as_str(),
            "scores": scores,
        }));
        if !args.json {
            println!(
                "{:>4},{:<4} {:>4}x{:<4} face {:.2}  {}",
                region.x,
                region.y,
                region.width,
                region.height,
                region.confidence,
                label
            );
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else if regions.is_empty() {
        println!("No faces found");
    }
    Ok(())
}

fn open_link(port: Option<String>, baud: u32, timeout: Duration) -> Result<SerialLink> {
    let path = match port {
        Some(path) => path,
        None => detect_usb_port()?,
    };
    SerialLink::open(LinkSettings {
        path,
        baud_rate: baud,
        timeout,
    })
    .context("opening serial port")
}

fn listen(port: Option<String>, baud: u32) -> Result<()> {
    let link = open_link(port, baud, Duration::from_millis(100))?;
    println!("Listening on {} (Ctrl-C to stop)", link.settings().path);
    let mut reader = RelayReader::new(link);
    loop {
        match reader.poll() {
            ReadOutcome::Labels(labels) => {
                for label in labels {
                    println!("{label}");
                }
            }
            ReadOutcome::Idle => std::thread::sleep(Duration::from_millis(50)),
            ReadOutcome::Failed => std::thread::sleep(Duration::from_secs(1)),
        }
    }
}

fn send(text: &str, port: Option<String>, baud: u32, count: u32) -> Result<()> {
    let label = Label::new(text)?;
    if count == 0 {
        bail!("--count must be at least 1");
    }
    let mut emitter = LabelEmitter::new(open_link(port, baud, Duration::from_secs(1))?);
    for _ in 0..count {
        emitter.emit(&label)?;
    }
    println!("Sent {label} x{}", emitter.emitted());
    Ok(())
}
