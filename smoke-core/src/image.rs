//! Container image build and publication.
//!
//! Builds the node image with `docker buildx build` for a fixed platform and
//! pushes it under the test tag in the same invocation.

use thiserror::Error;

use crate::command::{CommandError, CommandRunner, CommandSpec};
use crate::config::{resolve, ImageConfig};
use crate::source::SourceTree;

/// Errors from building or pushing the image.
#[derive(Debug, Error)]
pub enum ImageError {
    /// The build file does not exist in the checkout.
    #[error("build file not found: {0}")]
    MissingDockerfile(std::path::PathBuf),

    /// `docker buildx build` failed.
    #[error("image build failed: {0}")]
    BuildFailed(#[from] CommandError),
}

/// Build the `docker buildx build` invocation for `config`.
///
/// Returns args for:
/// `docker buildx build --platform <p> -f <file> -t <tag> --push|--load <context>`
pub fn build_command(config: &ImageConfig, source: &SourceTree) -> CommandSpec {
    let dockerfile = resolve(&source.dir, &config.dockerfile);
    let context = resolve(&source.dir, &config.context);

    CommandSpec::new("docker")
        .args(["buildx", "build"])
        .args(["--platform", config.platform.as_str()])
        .arg("-f")
        .arg(dockerfile.to_string_lossy())
        .args(["-t", config.tag.as_str()])
        .arg(if config.push { "--push" } else { "--load" })
        .arg(context.to_string_lossy())
}

/// Build the image and publish it under the configured tag.
pub async fn build_and_push<R: CommandRunner + ?Sized>(
    runner: &R,
    config: &ImageConfig,
    source: &SourceTree,
) -> Result<(), ImageError> {
    let dockerfile = resolve(&source.dir, &config.dockerfile);
    if !dockerfile.is_file() {
        return Err(ImageError::MissingDockerfile(dockerfile));
    }

    tracing::info!(
        tag = %config.tag,
        platform = %config.platform,
        push = config.push,
        commit = %source.short_commit(),
        "building image"
    );

    runner.run_ok(&build_command(config, source)).await?;

    tracing::info!(tag = %config.tag, "image ready");
    Ok(())
}
