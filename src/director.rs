//! Pipeline orchestration: Writer -> Illustrator -> Image, strictly
//! sequential. Stages absorb their own failures; the director surfaces only
//! invocation failures and unusable stage bodies, always with the partial
//! results already produced.

use crate::config::Config;
use crate::genai::GenerativeClient;
use crate::model::{MimeType, PipelineError, PipelineErrorKind, PipelineReport, StageResult};
use crate::stages::{
    IllustratorStage, ImageStage, WriterStage, ILLUSTRATOR_STAGE, IMAGE_STAGE, WRITER_STAGE,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, error, info};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Raw outcome of one named-stage invocation, before the director folds it
/// into a [`StageResult`].
#[derive(Debug, Clone)]
pub struct StageReply {
    pub content_type: String,
    pub metadata: Map<String, Value>,
    pub body: StageBody,
}

#[derive(Debug, Clone)]
pub enum StageBody {
    Json(Value),
    Binary { bytes: Vec<u8>, mime_type: MimeType },
}

/// Named-stage invocation capability. An `Err` here means the stage itself
/// was unreachable, which is the one failure the pipeline surfaces.
#[async_trait]
pub trait StageInvoker: Send + Sync {
    async fn invoke(&self, name: &str, payload: &Value) -> Result<StageReply>;
}

/// In-process invoker hosting all three stages. A stage behaves identically
/// whether called through here or used directly.
pub struct LocalInvoker {
    writer: WriterStage,
    illustrator: IllustratorStage,
    image: ImageStage,
}

impl LocalInvoker {
    pub fn new(client: Arc<dyn GenerativeClient>, config: &Config) -> Self {
        Self {
            writer: WriterStage::new(client.clone()),
            illustrator: IllustratorStage::new(client.clone()),
            image: ImageStage::new(client, config.genai.image_model.clone()),
        }
    }
}

#[async_trait]
impl StageInvoker for LocalInvoker {
    async fn invoke(&self, name: &str, payload: &Value) -> Result<StageReply> {
        match name {
            WRITER_STAGE => {
                let page = self.writer.produce_next_page(payload).await;
                Ok(StageReply {
                    content_type: "application/json".to_string(),
                    metadata: Map::new(),
                    body: StageBody::Json(serde_json::to_value(page)?),
                })
            }
            ILLUSTRATOR_STAGE => {
                let envelope = self.illustrator.produce_plan(payload).await;
                Ok(StageReply {
                    content_type: "application/json".to_string(),
                    metadata: Map::new(),
                    body: StageBody::Json(serde_json::to_value(envelope)?),
                })
            }
            IMAGE_STAGE => {
                let rendered = self.image.render_image(payload).await;
                let metadata = rendered
                    .metadata
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect();
                Ok(StageReply {
                    content_type: rendered.mime_type.as_str().to_string(),
                    metadata,
                    body: StageBody::Binary { bytes: rendered.bytes, mime_type: rendered.mime_type },
                })
            }
            other => Err(anyhow!("unknown stage: {}", other)),
        }
    }
}

/// Folds a stage reply into the JSON-friendly result shape. Binary bodies
/// become a base64 descriptor.
fn serialize_reply(name: &str, reply: StageReply) -> StageResult {
    let body = match reply.body {
        StageBody::Json(value) => value,
        StageBody::Binary { bytes, .. } => json!({
            "encoding": "base64",
            "data": BASE64.encode(&bytes),
            "size": bytes.len(),
        }),
    };

    StageResult {
        stage: name.to_string(),
        content_type: reply.content_type,
        metadata: reply.metadata,
        body,
    }
}

pub struct Director {
    invoker: Arc<dyn StageInvoker>,
}

impl Director {
    pub fn new(invoker: Arc<dyn StageInvoker>) -> Self {
        Self { invoker }
    }

    async fn invoke_stage(&self, name: &str, payload: &Value) -> Result<StageResult> {
        debug!(
            "invoking stage '{}' with payload keys: {:?}",
            name,
            payload.as_object().map(|m| m.keys().collect::<Vec<_>>()).unwrap_or_default()
        );
        let reply = self.invoker.invoke(name, payload).await?;
        Ok(serialize_reply(name, reply))
    }

    /// Runs the full pipeline. Cancellation is best-effort: dropping the
    /// returned future abandons remaining stages without rollback.
    pub async fn run(&self, payload: &Value) -> PipelineReport {
        info!("director starting orchestration");
        let mut report = PipelineReport::default();

        // Stage 1: writer
        let writer_result = match self.invoke_stage(WRITER_STAGE, payload).await {
            Ok(result) => result,
            Err(e) => {
                error!("writer stage invocation failed: {:#}", e);
                report.error = Some(invocation_error(WRITER_STAGE, &e));
                return report;
            }
        };
        let page_payload = writer_result.body.clone();
        report.writer = Some(writer_result);

        if !page_payload.is_object() {
            error!("writer stage returned non-object body");
            report.error = Some(invalid_payload_error(WRITER_STAGE));
            return report;
        }

        // Stage 2: illustrator
        let illustrator_result = match self.invoke_stage(ILLUSTRATOR_STAGE, &page_payload).await {
            Ok(result) => result,
            Err(e) => {
                error!("illustrator stage invocation failed: {:#}", e);
                report.error = Some(invocation_error(ILLUSTRATOR_STAGE, &e));
                return report;
            }
        };
        let enriched_payload = illustrator_result.body.clone();
        report.illustrator = Some(illustrator_result);

        if !enriched_payload.is_object() {
            error!("illustrator stage returned non-object body");
            report.error = Some(invalid_payload_error(ILLUSTRATOR_STAGE));
            return report;
        }

        // Stage 3: image generator
        match self.invoke_stage(IMAGE_STAGE, &enriched_payload).await {
            Ok(result) => {
                report.image = Some(result);
            }
            Err(e) => {
                error!("image stage invocation failed: {:#}", e);
                report.error = Some(invocation_error(IMAGE_STAGE, &e));
                return report;
            }
        }

        info!("director orchestration completed successfully");
        report
    }
}

fn invocation_error(stage: &str, e: &anyhow::Error) -> PipelineError {
    PipelineError {
        stage: stage.to_string(),
        kind: PipelineErrorKind::InvocationFailed,
        details: format!("{:#}", e),
    }
}

fn invalid_payload_error(stage: &str) -> PipelineError {
    PipelineError {
        stage: stage.to_string(),
        kind: PipelineErrorKind::InvalidPayload,
        details: format!("{} stage must return a JSON object payload", stage),
    }
}
