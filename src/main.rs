use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use webverse::config::Config;
use webverse::director::{Director, LocalInvoker};
use webverse::genai;
use webverse::model::{MimeType, PipelineReport, StageResult};
use webverse::stages;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' is valid or GOOGLE_API_KEY is set.");
            return Err(e);
        }
    };
    config.ensure_directories()?;

    let client = genai::create_client(&config)?;
    let invoker = Arc::new(LocalInvoker::new(client, &config));

    // Payload comes from a file argument or stdin; an empty or unreadable
    // payload simply starts a new story.
    let raw = match std::env::args().nth(1) {
        Some(path) => std::fs::read(&path).with_context(|| format!("Failed to read {}", path))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };
    let payload = Value::Object(stages::read_payload(&raw));

    let report = Director::new(invoker).run(&payload).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(image) = &report.image {
        write_image(&config, &report, image)?;
    }

    Ok(())
}

fn write_image(config: &Config, report: &PipelineReport, image: &StageResult) -> Result<()> {
    let data = match image.body.get("data").and_then(Value::as_str) {
        Some(data) => data,
        None => return Ok(()),
    };
    let bytes = BASE64.decode(data).context("Image body was not valid base64")?;

    let page_number = report
        .writer
        .as_ref()
        .and_then(|w| w.body.get("page"))
        .and_then(Value::as_u64)
        .unwrap_or(1);
    let ext = MimeType::parse_lenient(&image.content_type).extension();
    let path = Path::new(&config.output_folder).join(format!("page_{:03}.{}", page_number, ext));

    std::fs::write(&path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Page image written to {}", path.display());
    Ok(())
}
