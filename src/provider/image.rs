use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use super::{ImageApi, ProviderClient, read_capped};
use crate::error::GenError;

/// Image generation body.
#[derive(Debug, Clone, Serialize)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    pub n: u32,
}

impl ImageRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            size: "1024x1024".to_string(),
            quality: None,
            style: None,
            n: 1,
        }
    }
}

/// Image edit: the source picture plus an instruction.
#[derive(Debug, Clone)]
pub struct ImageEditRequest {
    pub model: String,
    pub prompt: String,
    pub image: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
    pub size: Option<String>,
}

/// One image returned by the provider: a URL, inline bytes, or both.
#[derive(Debug, Clone, Default)]
pub struct GeneratedImage {
    pub url: Option<String>,
    pub bytes: Option<Vec<u8>>,
    pub revised_prompt: Option<String>,
}

#[derive(Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}

/// First image of an images response; inline base64 is decoded.
pub fn parse_images_response(body: &[u8]) -> Result<GeneratedImage, GenError> {
    let parsed: ImagesResponse = serde_json::from_slice(body)
        .map_err(|e| GenError::SchemaParse(format!("images response: {e}")))?;
    let first = parsed
        .data
        .into_iter()
        .next()
        .ok_or_else(|| GenError::SchemaParse("images response has no data".to_string()))?;
    let bytes = first
        .b64_json
        .map(|b64| BASE64.decode(b64.as_bytes()))
        .transpose()
        .map_err(|e| GenError::SchemaParse(format!("invalid base64 image: {e}")))?;
    if first.url.is_none() && bytes.is_none() {
        return Err(GenError::SchemaParse(
            "image has neither url nor b64_json".to_string(),
        ));
    }
    Ok(GeneratedImage {
        url: first.url,
        bytes,
        revised_prompt: first.revised_prompt,
    })
}

#[async_trait]
impl ImageApi for ProviderClient {
    async fn generate_image(&self, request: &ImageRequest) -> Result<GeneratedImage, GenError> {
        let url = self.url("/images/generations", self.api_version.as_deref());
        tracing::info!(model = request.model, size = request.size, "generating image");
        let response = self.send(self.http.post(&url).json(request)).await?;
        parse_images_response(&read_capped(response).await?)
    }

    async fn edit_image(&self, request: &ImageEditRequest) -> Result<GeneratedImage, GenError> {
        let url = self.url("/images/edits", self.api_version.as_deref());
        let image = Part::bytes(request.image.clone())
            .file_name(request.file_name.clone())
            .mime_str(&request.mime_type)
            .map_err(|e| GenError::Other(format!("invalid mime type {}: {e}", request.mime_type)))?;
        let mut form = Form::new()
            .text("model", request.model.clone())
            .text("prompt", request.prompt.clone())
            .part("image", image);
        if let Some(size) = &request.size {
            form = form.text("size", size.clone());
        }
        tracing::info!(model = request.model, bytes = request.image.len(), "editing image");
        let response = self.send(self.http.post(&url).multipart(form)).await?;
        parse_images_response(&read_capped(response).await?)
    }
}
