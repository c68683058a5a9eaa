use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of a media item's format catalog, as reported by yt-dlp.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MediaVariant {
    #[serde(default)]
    pub format_id: String,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub tbr: Option<f64>,
    #[serde(default)]
    pub abr: Option<f64>,
    #[serde(default)]
    pub filesize: Option<f64>,
    #[serde(default)]
    pub filesize_approx: Option<f64>,
    #[serde(default)]
    pub format_note: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

fn is_real_codec(codec: &Option<String>) -> bool {
    codec.as_deref().is_some_and(|c| !c.is_empty() && c != "none")
}

impl MediaVariant {
    pub fn has_video(&self) -> bool {
        is_real_codec(&self.vcodec)
    }

    pub fn has_audio(&self) -> bool {
        is_real_codec(&self.acodec)
    }

    pub fn is_muxed(&self) -> bool {
        self.has_video() && self.has_audio()
    }

    /// Exact size when known, otherwise yt-dlp's estimate
    pub fn effective_size(&self) -> Option<f64> {
        self.filesize.or(self.filesize_approx)
    }

    pub fn label(&self) -> &str {
        self.format_note.as_deref().unwrap_or(&self.format_id)
    }
}

/// Title and format catalog of a media item. `raw` keeps the full
/// `--dump-json` document for clients that want more than the catalog.
#[derive(Debug, Clone)]
pub struct VideoInfo {
    pub title: String,
    pub formats: Vec<MediaVariant>,
    pub raw: Value,
}

impl VideoInfo {
    pub fn from_json(raw: Value) -> serde_json::Result<Self> {
        let title = raw["title"].as_str().unwrap_or("video").to_string();
        let formats = match raw.get("formats") {
            Some(formats) if !formats.is_null() => Vec::<MediaVariant>::deserialize(formats)?
                .into_iter()
                // an entry without an id cannot be passed to `-f`
                .filter(|variant| !variant.format_id.is_empty())
                .collect(),
            _ => Vec::new(),
        };

        Ok(Self {
            title,
            formats,
            raw,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Other
        }
    }

    pub fn binary_name(&self) -> &'static str {
        match self {
            Platform::Windows => "yt-dlp.exe",
            Platform::Linux | Platform::Other => "yt-dlp",
        }
    }

    pub fn release_url(&self) -> &'static str {
        match self {
            Platform::Windows => {
                "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp.exe"
            }
            Platform::Linux => {
                "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp_linux"
            }
            Platform::Other => "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Linux => "linux",
            Platform::Other => "other",
        }
    }
}
