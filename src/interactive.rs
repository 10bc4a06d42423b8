//! Question-and-answer flow behind `jobctl interactive`.
//!
//! Reads answers line by line from any `AsyncBufRead`, so the binary wires in
//! stdin/stdout and tests feed scripted answers.
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};

use crate::error::AppResult;
use crate::pipeline::{self, RunInputs};
use crate::preprocess::{crop_source, detect_faces, pick_face, FaceDetector, FaceSelection};
use crate::presets::{self, DEFAULT_TEMPLATE_ID};
use crate::workflow::ApiClient;

pub struct Prompter<R, W> {
    lines: Lines<R>,
    out: W,
}

impl<R, W> Prompter<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(input: R, out: W) -> Self {
        Prompter {
            lines: input.lines(),
            out,
        }
    }

    /// Print `question` and return the trimmed answer; end of input reads as
    /// an empty answer.
    pub async fn ask(&mut self, question: &str) -> AppResult<String> {
        self.out.write_all(question.as_bytes()).await?;
        self.out.flush().await?;
        let line = self.lines.next_line().await?.unwrap_or_default();
        Ok(line.trim().to_string())
    }

    pub async fn say(&mut self, line: &str) -> AppResult<()> {
        self.out.write_all(line.as_bytes()).await?;
        self.out.write_all(b"\n").await?;
        self.out.flush().await?;
        Ok(())
    }

    async fn confirm(&mut self, question: &str) -> AppResult<bool> {
        let answer = self.ask(question).await?;
        Ok(matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes"))
    }

    pub fn output(&self) -> &W {
        &self.out
    }
}

/// Source image, optional face crop and upscale, template, then either a
/// target image or a prompt. Returns the downloaded artifact.
pub async fn run<R, W>(
    client: &ApiClient,
    detector: Option<&dyn FaceDetector>,
    prompter: &mut Prompter<R, W>,
) -> AppResult<PathBuf>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut source = PathBuf::from(prompter.ask("Enter path to source image: ").await?);

    if prompter.confirm("Crop a face out of the source image? (yes/no): ").await? {
        if let Some(selection) = choose_face(&source, detector, prompter).await? {
            source = crop_source(&source, selection, detector).await?;
            prompter.say(&format!("Face cropped and saved as {}", source.display())).await?;
        }
    }

    if prompter.confirm("Upscale the source image first? (yes/no): ").await? {
        source = presets::run_upscale(client, &source).await?;
        prompter.say(&format!("Upscaled image saved to {}", source.display())).await?;
    }

    let template_id = prompter
        .ask(&format!("Enter template ID [{}]: ", DEFAULT_TEMPLATE_ID))
        .await?;
    let template_id = if template_id.is_empty() {
        DEFAULT_TEMPLATE_ID.to_string()
    } else {
        template_id
    };

    let mut images = vec![source];
    let mut prompt = None;
    if prompter.confirm("Do you want to provide a target image? (yes/no): ").await? {
        images.push(PathBuf::from(prompter.ask("Enter path to target image: ").await?));
    } else {
        prompt = Some(prompter.ask("Enter a positive prompt: ").await?);
    }

    let inputs = RunInputs {
        template_id,
        images,
        prompt,
        ..RunInputs::default()
    };
    let path = pipeline::run(client, &inputs).await?;
    prompter.say(&format!("Image saved to {}", path.display())).await?;
    Ok(path)
}

/// List detected faces and read a choice. Falls back to a typed `x,y,w,h` box
/// when there is no detector or it found nothing; a blank answer skips the crop.
async fn choose_face<R, W>(
    source: &Path,
    detector: Option<&dyn FaceDetector>,
    prompter: &mut Prompter<R, W>,
) -> AppResult<Option<FaceSelection>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let faces = match detector {
        Some(detector) => detect_faces(source, detector)?,
        None => Vec::new(),
    };

    let answer = if faces.is_empty() {
        if detector.is_some() {
            prompter.say("No faces detected in the image.").await?;
        }
        prompter.ask("Face box to crop (x,y,w,h), blank to skip: ").await?
    } else {
        prompter.say(&format!("{} face(s) detected.", faces.len())).await?;
        for (idx, f) in faces.iter().enumerate() {
            prompter
                .say(&format!("  [{}] {},{},{},{}", idx, f.x, f.y, f.width, f.height))
                .await?;
        }
        prompter
            .ask(&format!(
                "Enter the index of the face to crop (0 to {}), or x,y,w,h: ",
                faces.len() - 1
            ))
            .await?
    };

    if answer.is_empty() {
        return Ok(None);
    }
    let selection: FaceSelection = answer.parse()?;
    // indices refer to the list printed above
    match selection {
        FaceSelection::Index(index) => pick_face(&faces, index).map(|face| Some(FaceSelection::Box(face))),
        FaceSelection::Box(_) => Ok(Some(selection)),
    }
}
