use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

pub const ALLOWED_CONTENT_TYPES: [&str; 4] =
    ["image/jpeg", "image/jpg", "image/png", "image/webp"];

lazy_static! {
    static ref SSID_RE: Regex = Regex::new(r"(?i)S:([^;]*);?").unwrap();
    static ref SECURITY_RE: Regex = Regex::new(r"(?i)T:([^;]*);?").unwrap();
    static ref PASSWORD_RE: Regex = Regex::new(r"(?i)P:([^;]*);?").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
    pub security: String,
}

#[derive(Debug, Error)]
pub enum WifiError {
    #[error("No valid image was received")]
    MissingImage,

    #[error("The file is too large ({size} bytes). Maximum {max_mb}MB")]
    TooLarge { size: usize, max_mb: usize },

    #[error("Invalid file type {0:?}. Only images are allowed (JPEG, PNG, WebP)")]
    UnsupportedType(String),

    #[error("Error processing the image")]
    Image(#[from] image::ImageError),

    #[error("Could not detect a QR code in the image")]
    NoQrCode,

    #[error("The QR code does not contain valid WiFi information")]
    NotWifi { raw: String },
}

/// Checks an upload before any decoding work is done.
pub fn validate_upload(
    content_type: Option<&str>,
    size: usize,
    max_bytes: usize,
) -> Result<(), WifiError> {
    if size > max_bytes {
        return Err(WifiError::TooLarge {
            size,
            max_mb: max_bytes / (1024 * 1024),
        });
    }

    let content_type = content_type.unwrap_or_default();
    if !ALLOWED_CONTENT_TYPES.contains(&content_type) {
        return Err(WifiError::UnsupportedType(content_type.to_string()));
    }

    Ok(())
}

/// Decodes the first readable QR code in an encoded image.
pub fn decode_qr(data: &[u8]) -> Result<String, WifiError> {
    let image = image::load_from_memory(data)?.to_luma8();
    debug!("Image decoded: {}x{}", image.width(), image.height());

    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
        image.width() as usize,
        image.height() as usize,
        |x, y| image.get_pixel(x as u32, y as u32).0[0],
    );
    let grids = prepared.detect_grids();
    debug!("Found {} QR grid candidates", grids.len());

    grids
        .iter()
        .find_map(|grid| match grid.decode() {
            Ok((_, content)) => Some(content),
            Err(e) => {
                debug!("Failed to decode QR grid: {}", e);
                None
            }
        })
        .ok_or(WifiError::NoQrCode)
}

/// Parses `WIFI:S:<ssid>;T:<security>;P:<password>;;` payloads. Fields may
/// appear in any order; SSID and password are required.
pub fn parse_wifi_qr(text: &str) -> Option<WifiCredentials> {
    if !text.to_uppercase().starts_with("WIFI:") {
        debug!("QR payload is not a WiFi configuration");
        return None;
    }

    let capture = |re: &Regex| re.captures(text).map(|c| c[1].to_string());

    let ssid = capture(&SSID_RE)?;
    let password = capture(&PASSWORD_RE)?;
    let security = capture(&SECURITY_RE).unwrap_or_else(|| "WPA".to_string());

    Some(WifiCredentials {
        ssid,
        password,
        security,
    })
}

/// Full pipeline for an uploaded image: validate, decode, parse.
pub fn scan_upload(
    data: &[u8],
    content_type: Option<&str>,
    max_bytes: usize,
) -> Result<WifiCredentials, WifiError> {
    validate_upload(content_type, data.len(), max_bytes)?;

    let text = decode_qr(data)?;
    info!("QR code detected ({} chars)", text.len());

    parse_wifi_qr(&text).ok_or(WifiError::NotWifi { raw: text })
}

/// Renders `text` as a QR code PNG: 8px modules with a 4-module quiet zone.
#[cfg(test)]
pub(crate) fn render_qr_png(text: &str) -> Vec<u8> {
    const SCALE: u32 = 8;
    const QUIET: u32 = 4;

    let code = qrcode::QrCode::new(text.as_bytes()).unwrap();
    let modules = code.width() as u32;
    let side = (modules + 2 * QUIET) * SCALE;

    let image = image::GrayImage::from_fn(side, side, |x, y| {
        let (mx, my) = (x / SCALE, y / SCALE);
        let range = QUIET..QUIET + modules;
        let dark = range.contains(&mx)
            && range.contains(&my)
            && code[((mx - QUIET) as usize, (my - QUIET) as usize)] == qrcode::Color::Dark;
        if dark {
            image::Luma([0u8])
        } else {
            image::Luma([255u8])
        }
    });

    let mut png = std::io::Cursor::new(Vec::new());
    image.write_to(&mut png, image::ImageFormat::Png).unwrap();
    png.into_inner()
}
