use anyhow::{bail, Context, Result};
use bollard::models::CreateImageInfo;
use bollard::query_parameters::CreateImageOptions;
use bollard::Docker;
use futures_util::StreamExt;

/// Parse an image reference into (name, tag).
/// "vllm/vllm-openai:v0.6.3" -> ("vllm/vllm-openai", "v0.6.3")
/// "vllm/vllm-openai" -> ("vllm/vllm-openai", "latest")
/// "registry:5000/vllm" -> ("registry:5000/vllm", "latest")
pub fn parse_image_ref(image: &str) -> (&str, &str) {
    match image.rsplit_once(':') {
        Some((name, tag)) if !name.is_empty() && !tag.is_empty() && !tag.contains('/') => {
            (name, tag)
        }
        _ => (image, "latest"),
    }
}

/// Check if an image exists locally.
pub async fn check_image_exists(docker: &Docker, image: &str) -> bool {
    docker.inspect_image(image).await.is_ok()
}

/// Pull an image, logging layer progress at debug level.
pub async fn pull_image(docker: &Docker, image: &str) -> Result<()> {
    let (name, tag) = parse_image_ref(image);
    tracing::info!(image = %image, "pulling image (model images can be large)");

    let options = CreateImageOptions {
        from_image: Some(name.to_string()),
        tag: Some(tag.to_string()),
        ..Default::default()
    };

    let mut stream = docker.create_image(Some(options), None, None);
    while let Some(result) = stream.next().await {
        let info: CreateImageInfo =
            result.with_context(|| format!("pulling image {}", image))?;
        if let Some(err) = &info.error_detail {
            bail!("image pull failed for {}: {:?}", image, err);
        }
        if let (Some(status), Some(id)) = (&info.status, &info.id) {
            tracing::debug!(image = %image, layer = %id, "{}", status);
        }
    }

    tracing::debug!(image = %image, "image pulled successfully");
    Ok(())
}

/// Pull the image unless it is already present locally.
pub async fn ensure_image(docker: &Docker, image: &str) -> Result<()> {
    if check_image_exists(docker, image).await {
        tracing::debug!(image = %image, "image already present locally");
        return Ok(());
    }
    pull_image(docker, image).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_image_with_tag() {
        assert_eq!(
            parse_image_ref("vllm/vllm-openai:v0.6.3"),
            ("vllm/vllm-openai", "v0.6.3")
        );
    }

    #[test]
    fn parse_image_without_tag() {
        assert_eq!(
            parse_image_ref("vllm/vllm-openai"),
            ("vllm/vllm-openai", "latest")
        );
    }

    #[test]
    fn parse_image_with_registry_port() {
        assert_eq!(
            parse_image_ref("localhost:5000/vllm"),
            ("localhost:5000/vllm", "latest")
        );
        assert_eq!(
            parse_image_ref("localhost:5000/vllm:nightly"),
            ("localhost:5000/vllm", "nightly")
        );
    }
}
