use std::cmp::Ordering;

use thiserror::Error;
use tracing::debug;

use super::types::MediaVariant;

/// Legacy progressive (muxed) YouTube format ids, in order of preference.
const LEGACY_MUXED_IDS: [&str; 2] = ["18", "22"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatClass {
    AudioOnly,
    Muxed,
    VideoOnly,
}

impl FormatClass {
    /// Interprets the free-text format strings clients send, e.g.
    /// `bestaudio`, `bestvideo+bestaudio`, `best`, `videoonly`.
    pub fn parse(format: &str) -> Self {
        if format.contains("bestaudio") {
            FormatClass::AudioOnly
        } else if format.contains('+') || !format.contains("videoonly") {
            FormatClass::Muxed
        } else {
            FormatClass::VideoOnly
        }
    }

    fn default_extension(&self) -> &'static str {
        match self {
            FormatClass::AudioOnly => "mp3",
            FormatClass::Muxed | FormatClass::VideoOnly => "mp4",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionRequest {
    pub class: FormatClass,
    pub audio_ext: Option<String>,
}

impl SelectionRequest {
    pub fn new(format: &str, audio_ext: Option<String>) -> Self {
        Self {
            class: FormatClass::parse(format),
            audio_ext: audio_ext.filter(|ext| !ext.trim().is_empty()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Selection<'a> {
    pub variant: &'a MediaVariant,
    pub extension: String,
    pub filename: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("No downloadable formats available for this media")]
    NoVariants,
}

fn desc_f64(a: Option<f64>, b: Option<f64>) -> Ordering {
    b.unwrap_or(0.0).total_cmp(&a.unwrap_or(0.0))
}

fn desc_u32(a: Option<u32>, b: Option<u32>) -> Ordering {
    b.unwrap_or(0).cmp(&a.unwrap_or(0))
}

/// Stable sort, so equal keys keep catalog order.
fn best_by<'a, F>(
    candidates: impl Iterator<Item = &'a MediaVariant>,
    compare: F,
) -> Option<&'a MediaVariant>
where
    F: FnMut(&&'a MediaVariant, &&'a MediaVariant) -> Ordering,
{
    let mut candidates: Vec<&MediaVariant> = candidates.collect();
    candidates.sort_by(compare);
    candidates.into_iter().next()
}

fn best_audio(variants: &[MediaVariant]) -> Option<&MediaVariant> {
    best_by(
        variants.iter().filter(|v| v.has_audio() && !v.has_video()),
        |a, b| desc_f64(a.abr, b.abr),
    )
}

fn best_muxed(variants: &[MediaVariant]) -> Option<&MediaVariant> {
    let muxed = best_by(variants.iter().filter(|v| v.is_muxed()), |a, b| {
        desc_u32(a.height, b.height).then_with(|| desc_f64(a.tbr, b.tbr))
    });
    if muxed.is_some() {
        return muxed;
    }

    debug!("No muxed formats, trying legacy progressive ids");
    LEGACY_MUXED_IDS
        .iter()
        .find_map(|id| variants.iter().find(|v| v.format_id == *id))
        .or_else(|| best_by(variants.iter(), |a, b| desc_f64(a.filesize, b.filesize)))
}

fn best_video(variants: &[MediaVariant]) -> Option<&MediaVariant> {
    best_by(
        variants.iter().filter(|v| v.has_video() && !v.has_audio()),
        |a, b| desc_u32(a.height, b.height),
    )
}

fn largest(variants: &[MediaVariant]) -> Option<&MediaVariant> {
    best_by(variants.iter(), |a, b| {
        desc_f64(a.effective_size(), b.effective_size())
    })
}

/// Picks the single best variant of `variants` for `request` and derives the
/// download filename from `title`. Only an empty catalog is an error.
pub fn select_format<'a>(
    variants: &'a [MediaVariant],
    title: &str,
    request: &SelectionRequest,
) -> Result<Selection<'a>, SelectionError> {
    let picked = match request.class {
        FormatClass::AudioOnly => best_audio(variants)
            .map(|v| (v, request.audio_ext.clone().or_else(|| v.ext.clone()))),
        FormatClass::Muxed => best_muxed(variants).map(|v| (v, v.ext.clone())),
        FormatClass::VideoOnly => best_video(variants).map(|v| (v, v.ext.clone())),
    };

    let (variant, ext) = match picked {
        Some(pair) => pair,
        None => {
            let variant = largest(variants).ok_or(SelectionError::NoVariants)?;
            debug!(
                "Falling back to largest format {} for {:?}",
                variant.format_id, request.class
            );
            (variant, variant.ext.clone())
        }
    };

    let extension = ext.unwrap_or_else(|| request.class.default_extension().to_string());

    Ok(Selection {
        variant,
        filename: format!("{}.{}", title, extension),
        extension,
    })
}
