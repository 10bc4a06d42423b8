//! Optional face crop applied to a source image before upload.
//!
//! Faces are found by a `FaceDetector` (SeetaFace via `rustface`, model file
//! from `FACE_MODEL_PATH`) and picked by index, or given directly as an
//! `x,y,w,h` box. The chosen box is padded by a fifth of its height, clamped
//! to the image and scaled to 512x512.
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use rustface::{Detector, ImageData};

use crate::error::{AppError, AppResult};

/// Env var naming the SeetaFace frontal model (`seeta_fd_frontal_v1.0.bin`).
pub const FACE_MODEL_ENV: &str = "FACE_MODEL_PATH";
pub const CROP_SIZE: u32 = 512;
const JPEG_QUALITY: u8 = 95;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FromStr for FaceBox {
    type Err = AppError;

    /// `x,y,w,h` in pixels.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [x, y, w, h] = parts.as_slice() else {
            return Err(AppError::InvalidFaceBox(format!("'{}', expected x,y,w,h", s)));
        };
        let num = |v: &str| {
            v.parse::<u32>()
                .map_err(|e| AppError::InvalidFaceBox(format!("'{}': {}", v, e)))
        };
        let face = FaceBox {
            x: num(*x)?,
            y: num(*y)?,
            width: num(*w)?,
            height: num(*h)?,
        };
        if face.width == 0 || face.height == 0 {
            return Err(AppError::InvalidFaceBox(format!("'{}' has zero size", s)));
        }
        Ok(face)
    }
}

/// Region actually cut out of a `img_w` x `img_h` image, as `(x, y, w, h)`.
/// `None` when the padded box falls entirely outside the image.
pub fn padded_region(face: FaceBox, img_w: u32, img_h: u32) -> Option<(u32, u32, u32, u32)> {
    let pad = face.height / 5;
    let x1 = face.x.saturating_sub(pad);
    let y1 = face.y.saturating_sub(pad);
    let x2 = face.x.saturating_add(face.width).saturating_add(pad).min(img_w);
    let y2 = face.y.saturating_add(face.height).saturating_add(pad).min(img_h);
    (x2 > x1 && y2 > y1).then(|| (x1, y1, x2 - x1, y2 - y1))
}

/// Crop `face` out of `input` and write a 512x512 image to `output`.
pub fn crop_face(input: &Path, face: FaceBox, output: &Path) -> AppResult<PathBuf> {
    if !input.is_file() {
        return Err(AppError::InputNotFound(input.to_path_buf()));
    }
    let img = image::open(input)?;
    let (x, y, w, h) = padded_region(face, img.width(), img.height()).ok_or_else(|| {
        AppError::InvalidFaceBox(format!(
            "{:?} is outside the {}x{} image",
            face,
            img.width(),
            img.height()
        ))
    })?;
    let face_img = img
        .crop_imm(x, y, w, h)
        .resize_exact(CROP_SIZE, CROP_SIZE, FilterType::Lanczos3);

    let is_jpeg = output
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg"))
        .unwrap_or(false);
    if is_jpeg {
        let mut writer = BufWriter::new(File::create(output)?);
        let mut encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
        encoder.encode_image(&DynamicImage::ImageRgb8(face_img.to_rgb8()))?;
    } else {
        face_img.save(output)?;
    }
    tracing::info!(
        "Face cropped from {} ({}x{} at {},{}) and saved as {}",
        input.display(),
        w,
        h,
        x,
        y,
        output.display()
    );
    Ok(output.to_path_buf())
}

/// Finds face rectangles in a grayscale image.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &GrayImage) -> AppResult<Vec<FaceBox>>;
}

/// SeetaFace frontal detector. The model is loaded per call, so one value can
/// be shared freely between tasks.
#[derive(Debug, Clone)]
pub struct SeetaFaceDetector {
    model_path: PathBuf,
    min_face_size: u32,
    score_threshold: f64,
}

impl SeetaFaceDetector {
    pub fn new(model_path: impl Into<PathBuf>) -> AppResult<Self> {
        let model_path = model_path.into();
        if !model_path.is_file() {
            return Err(AppError::Config(format!(
                "face model not found at {}",
                model_path.display()
            )));
        }
        Ok(SeetaFaceDetector {
            model_path,
            min_face_size: 20,
            score_threshold: 2.0,
        })
    }

    /// `None` when `FACE_MODEL_PATH` is unset.
    pub fn from_env() -> AppResult<Option<Self>> {
        match std::env::var(FACE_MODEL_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::new(path).map(Some),
            _ => Ok(None),
        }
    }
}

impl FaceDetector for SeetaFaceDetector {
    fn detect(&self, image: &GrayImage) -> AppResult<Vec<FaceBox>> {
        let model = self
            .model_path
            .to_str()
            .ok_or_else(|| AppError::Config(format!("non UTF-8 model path {}", self.model_path.display())))?;
        let mut detector =
            rustface::create_detector(model).map_err(|e| AppError::FaceDetection(e.to_string()))?;
        detector.set_min_face_size(self.min_face_size);
        detector.set_score_thresh(self.score_threshold);
        detector.set_pyramid_scale_factor(0.8);
        detector.set_slide_window_step(4, 4);
        Ok(run_detector(&mut *detector, image))
    }
}

fn run_detector(detector: &mut dyn Detector, image: &GrayImage) -> Vec<FaceBox> {
    let (width, height) = image.dimensions();
    let mut data = ImageData::new(image.as_raw(), width, height);
    detector
        .detect(&mut data)
        .iter()
        .filter_map(|face| {
            let bbox = face.bbox();
            let x = bbox.x().max(0) as u32;
            let y = bbox.y().max(0) as u32;
            (bbox.width() > 0 && bbox.height() > 0).then(|| FaceBox {
                x,
                y,
                width: bbox.width(),
                height: bbox.height(),
            })
        })
        .collect()
}

/// Detect faces in `input`, ordered left to right (then top to bottom) so
/// indices are stable for the person choosing one.
pub fn detect_faces(input: &Path, detector: &dyn FaceDetector) -> AppResult<Vec<FaceBox>> {
    if !input.is_file() {
        return Err(AppError::InputNotFound(input.to_path_buf()));
    }
    let gray = image::open(input)?.to_luma8();
    let mut faces = detector.detect(&gray)?;
    faces.sort_by_key(|f| (f.x, f.y));
    tracing::info!("{} face(s) detected in {}", faces.len(), input.display());
    Ok(faces)
}

/// Index into `faces`, with the detected count in the error.
pub fn pick_face(faces: &[FaceBox], index: usize) -> AppResult<FaceBox> {
    if faces.is_empty() {
        return Err(AppError::InvalidFaceBox("no faces detected".to_string()));
    }
    faces.get(index).copied().ok_or_else(|| {
        AppError::InvalidFaceBox(format!(
            "index {} out of range, expected 0 to {}",
            index,
            faces.len() - 1
        ))
    })
}

/// Which face to crop: a detected face by index, or an explicit box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceSelection {
    Index(usize),
    Box(FaceBox),
}

impl FromStr for FaceSelection {
    type Err = AppError;

    /// `2` picks detected face 2; `x,y,w,h` is used as is.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains(',') {
            return s.parse().map(FaceSelection::Box);
        }
        s.parse::<usize>()
            .map(FaceSelection::Index)
            .map_err(|_| AppError::InvalidFaceBox(format!("'{}', expected a face index or x,y,w,h", s)))
    }
}

impl FaceSelection {
    pub fn resolve(&self, input: &Path, detector: Option<&dyn FaceDetector>) -> AppResult<FaceBox> {
        match *self {
            FaceSelection::Box(face) => Ok(face),
            FaceSelection::Index(index) => {
                let detector = detector.ok_or_else(|| {
                    AppError::Config(format!(
                        "picking a face by index needs {}; pass the box as x,y,w,h instead",
                        FACE_MODEL_ENV
                    ))
                })?;
                pick_face(&detect_faces(input, detector)?, index)
            }
        }
    }
}

/// Where a crop of `source` is written: `<stem>_face.jpg` next to it.
pub fn cropped_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    source.with_file_name(format!("{}_face.jpg", stem))
}

/// `crop_face` on the blocking pool.
pub async fn crop_face_in_background(input: PathBuf, face: FaceBox, output: PathBuf) -> AppResult<PathBuf> {
    tokio::task::spawn_blocking(move || crop_face(&input, face, &output))
        .await
        .map_err(|e| AppError::Io(e.into()))?
}

/// Resolve `selection` against `source` and write the crop to
/// `cropped_path(source)`.
pub async fn crop_source(
    source: &Path,
    selection: FaceSelection,
    detector: Option<&dyn FaceDetector>,
) -> AppResult<PathBuf> {
    let face = selection.resolve(source, detector)?;
    crop_face_in_background(source.to_path_buf(), face, cropped_path(source)).await
}
