use anyhow::{anyhow, Context, Result};
use axum::{extract::State, Json};
use log::info;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, LazyLock};

use super::payload::*;
use crate::config::ChatfuelConfig;
use crate::core::shared::error::AppError;
use crate::core::shared::state::AppState;

static IMAGE_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https?://[^\s/?#]+/[^\s?#]*\.(jpe?g|png|gif|webp)(\?[^\s#]*)?$")
        .expect("Invalid image URL regex")
});

/// Hosts that serve chat attachments without a file extension.
const IMAGE_CDN_HOSTS: &[&str] = &["fbcdn.net", "fbsbx.com"];

pub fn is_image_url(url: &str) -> bool {
    if IMAGE_URL_REGEX.is_match(url) {
        return true;
    }
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return false;
    };
    matches!(parsed.scheme(), "http" | "https")
        && parsed.host_str().is_some_and(|host| {
            IMAGE_CDN_HOSTS
                .iter()
                .any(|cdn| host == *cdn || host.ends_with(&format!(".{cdn}")))
        })
        && parsed.path().len() > 1
}

#[derive(Debug, Serialize)]
struct RenderRequest<'a> {
    template: &'a str,
    image_url: &'a str,
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct RenderResponse {
    url: String,
}

/// Client for the external image service that composes certificates.
pub struct CertificateService<'a> {
    http: &'a reqwest::Client,
    config: &'a ChatfuelConfig,
}

impl<'a> CertificateService<'a> {
    pub fn new(http: &'a reqwest::Client, config: &'a ChatfuelConfig) -> Self {
        Self { http, config }
    }

    pub async fn render(&self, image_url: &str, name: &str) -> Result<String> {
        let endpoint = format!(
            "{}/certificates",
            self.config.certificate_service_url.trim_end_matches('/')
        );
        let response = self
            .http
            .post(&endpoint)
            .json(&RenderRequest {
                template: &self.config.certificate_template,
                image_url,
                name,
            })
            .send()
            .await
            .with_context(|| format!("Certificate service unreachable at {endpoint}"))?
            .error_for_status()
            .context("Certificate service rejected the request")?;

        let rendered: RenderResponse = response
            .json()
            .await
            .context("Certificate service returned an unexpected body")?;
        if rendered.url.is_empty() {
            return Err(anyhow!("Certificate service returned an empty URL"));
        }
        Ok(rendered.url)
    }
}

/// `POST /chatfuel/certificate`. An unusable image is answered in-band so
/// the bot can ask for another one, before anything else is validated.
pub async fn generate_certificate(
    State(state): State<Arc<AppState>>,
    payload: Payload,
) -> Result<Json<Value>, AppError> {
    let image = payload
        .get(&IMAGE)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|url| is_image_url(url));
    let Some(image) = image.map(str::to_string) else {
        info!("chatfuel certificate: no usable image in request");
        return Ok(Json(json!({
            "result": false,
            "redirect_to_blocks": [state.config.chatfuel.certificate_retry_block],
        })));
    };

    let mut v = Validator::default();
    let person_id = v.required_text(&payload, &PERSON_ID);
    let name = v.text(&payload, &NAME);

    let person = match &person_id {
        Some(id) => state.store.find_person(id).await?,
        None => None,
    };
    if person_id.is_some() && person.is_none() {
        v.reject(&PERSON_ID, "Person not found", payload.get(&PERSON_ID));
    }
    v.finish()?;
    let Some(person) = person else {
        return Err(AppError::Internal(anyhow!(
            "certificate validation passed without a person"
        )));
    };

    let name = name.unwrap_or_else(|| person.display_name());
    let url = CertificateService::new(&state.http, &state.config.chatfuel)
        .render(&image, &name)
        .await?;
    info!("chatfuel certificate: rendered for person {}", person.id);

    Ok(Json(json!({
        "result": true,
        "messages": [{
            "attachment": {
                "type": "image",
                "payload": { "url": url },
            },
        }],
    })))
}
